use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::Id;

/// The set of jobs and source files submitted with a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    /// Source file IDs mapped to their relative paths in the client's
    /// source directory.
    #[serde(default)]
    pub source_files: HashMap<Id, String>,
    pub jobs: Vec<Job>,
}

/// One unit of execution with a fixed command sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    /// Relative paths of the source files this job reads.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// IDs of jobs whose artifacts this job reads.
    #[serde(default)]
    pub deps: Vec<Id>,
    pub cmds: Vec<Cmd>,
}

/// A templated command. Either an exec command (argv, optional environment
/// and working directory) or a cat command that renders `cat_template` into
/// the file named by `cat_output`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cmd {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<String>,
    /// KEY=VALUE pairs added to the command's environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environ: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cat_template: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cat_output: String,
}

/// Paths substituted into a job's command templates: `{{source_dir}}`,
/// `{{output_dir}}` and `{{dep:<hex id>}}`.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub deps: HashMap<Id, PathBuf>,
}

impl Cmd {
    /// Render every templated string against the job context.
    pub fn render(&self, ctx: &JobContext) -> Cmd {
        Cmd {
            exec: self.exec.iter().map(|s| substitute(s, ctx)).collect(),
            environ: self.environ.iter().map(|s| substitute(s, ctx)).collect(),
            working_directory: self
                .working_directory
                .as_ref()
                .map(|s| substitute(s, ctx)),
            cat_template: substitute(&self.cat_template, ctx),
            cat_output: substitute(&self.cat_output, ctx),
        }
    }
}

fn substitute(template: &str, ctx: &JobContext) -> String {
    let mut out = template
        .replace("{{source_dir}}", &ctx.source_dir.to_string_lossy())
        .replace("{{output_dir}}", &ctx.output_dir.to_string_lossy());
    for (id, path) in &ctx.deps {
        out = out.replace(&format!("{{{{dep:{}}}}}", id), &path.to_string_lossy());
    }
    out
}

/// Topologically sort a build graph. The sort is stable: among jobs whose
/// dependencies are all satisfied, the smallest ID goes first, so replayed
/// builds release jobs in the same order. Rejects duplicate job IDs, edges to
/// jobs outside the graph, and cycles.
pub fn topo_sort(jobs: &[Job]) -> Result<Vec<Job>> {
    let mut by_id: HashMap<Id, &Job> = HashMap::with_capacity(jobs.len());
    for job in jobs {
        if by_id.insert(job.id, job).is_some() {
            return Err(Error::BadRequest(format!("duplicate job {}", job.id)));
        }
    }

    let mut indegree: HashMap<Id, usize> = HashMap::with_capacity(jobs.len());
    let mut dependents: HashMap<Id, Vec<Id>> = HashMap::new();
    for job in jobs {
        indegree.entry(job.id).or_insert(0);
        for dep in &job.deps {
            if !by_id.contains_key(dep) {
                return Err(Error::BadRequest(format!(
                    "job {} depends on unknown job {}",
                    job.id, dep
                )));
            }
            *indegree.entry(job.id).or_insert(0) += 1;
            dependents.entry(*dep).or_default().push(job.id);
        }
    }

    let mut ready: BTreeSet<Id> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut sorted = Vec::with_capacity(jobs.len());
    while let Some(id) = ready.iter().next().copied() {
        ready.remove(&id);
        sorted.push(by_id[&id].clone());
        for dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            let degree = indegree
                .get_mut(dependent)
                .expect("dependent is present in the indegree map");
            *degree -= 1;
            if *degree == 0 {
                ready.insert(*dependent);
            }
        }
    }

    if sorted.len() != jobs.len() {
        return Err(Error::BadRequest("dependency cycle in build graph".into()));
    }
    Ok(sorted)
}
