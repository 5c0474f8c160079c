use std::collections::HashMap;

use buildmesh::graph::{topo_sort, Cmd, Graph, Job, JobContext};
use buildmesh::id::Id;

fn job(seed: &str, deps: Vec<Id>) -> Job {
    Job {
        id: Id::hash(seed.as_bytes()),
        name: seed.to_string(),
        inputs: Vec::new(),
        deps,
        cmds: Vec::new(),
    }
}

fn position(sorted: &[Job], id: Id) -> usize {
    sorted
        .iter()
        .position(|j| j.id == id)
        .expect("job present in sorted output")
}

#[test]
fn test_topo_sort_respects_dependencies() {
    let a = job("a", vec![]);
    let b = job("b", vec![a.id]);
    let c = job("c", vec![a.id]);
    let d = job("d", vec![b.id, c.id]);

    let sorted = topo_sort(&[d.clone(), c.clone(), b.clone(), a.clone()]).unwrap();
    assert_eq!(sorted.len(), 4);
    assert!(position(&sorted, a.id) < position(&sorted, b.id));
    assert!(position(&sorted, a.id) < position(&sorted, c.id));
    assert!(position(&sorted, b.id) < position(&sorted, d.id));
    assert!(position(&sorted, c.id) < position(&sorted, d.id));
}

#[test]
fn test_topo_sort_is_deterministic() {
    let a = job("a", vec![]);
    let b = job("b", vec![]);
    let c = job("c", vec![a.id, b.id]);
    let d = job("d", vec![]);

    let forward = topo_sort(&[a.clone(), b.clone(), c.clone(), d.clone()]).unwrap();
    let shuffled = topo_sort(&[d.clone(), c, b.clone(), a.clone()]).unwrap();

    let forward_ids: Vec<Id> = forward.iter().map(|j| j.id).collect();
    let shuffled_ids: Vec<Id> = shuffled.iter().map(|j| j.id).collect();
    assert_eq!(forward_ids, shuffled_ids);

    // Among the initially ready jobs the smallest ID goes first.
    let smallest = [a.id, b.id, d.id].into_iter().min().unwrap();
    assert_eq!(forward_ids[0], smallest);
}

#[test]
fn test_topo_sort_rejects_cycle() {
    let a_id = Id::hash(b"cycle-a");
    let b_id = Id::hash(b"cycle-b");
    let a = Job {
        id: a_id,
        name: "a".into(),
        inputs: Vec::new(),
        deps: vec![b_id],
        cmds: Vec::new(),
    };
    let b = Job {
        id: b_id,
        name: "b".into(),
        inputs: Vec::new(),
        deps: vec![a_id],
        cmds: Vec::new(),
    };
    assert!(topo_sort(&[a, b]).is_err());
}

#[test]
fn test_topo_sort_rejects_unknown_dep() {
    let orphan = job("orphan", vec![Id::hash(b"missing")]);
    assert!(topo_sort(&[orphan]).is_err());
}

#[test]
fn test_topo_sort_rejects_duplicate_ids() {
    let a = job("dup", vec![]);
    let b = job("dup", vec![]);
    assert!(topo_sort(&[a, b]).is_err());
}

#[test]
fn test_cmd_render_substitutes_placeholders() {
    let dep = Id::hash(b"dep-job");
    let ctx = JobContext {
        source_dir: "/tmp/src".into(),
        output_dir: "/tmp/out".into(),
        deps: HashMap::from([(dep, "/tmp/artifacts/dep".into())]),
    };
    let cmd = Cmd {
        exec: vec![
            "cp".into(),
            "{{source_dir}}/main.c".into(),
            "{{output_dir}}/main.c".into(),
        ],
        environ: vec![format!("DEP_DIR={{{{dep:{dep}}}}}")],
        working_directory: Some("{{source_dir}}".into()),
        ..Cmd::default()
    };

    let rendered = cmd.render(&ctx);
    assert_eq!(rendered.exec[1], "/tmp/src/main.c");
    assert_eq!(rendered.exec[2], "/tmp/out/main.c");
    assert_eq!(rendered.environ[0], "DEP_DIR=/tmp/artifacts/dep");
    assert_eq!(rendered.working_directory.as_deref(), Some("/tmp/src"));
}

#[test]
fn test_cmd_render_cat_template() {
    let ctx = JobContext {
        source_dir: "/src".into(),
        output_dir: "/out".into(),
        deps: HashMap::new(),
    };
    let cmd = Cmd {
        cat_template: "generated in {{source_dir}}".into(),
        cat_output: "{{output_dir}}/gen.txt".into(),
        ..Cmd::default()
    };

    let rendered = cmd.render(&ctx);
    assert_eq!(rendered.cat_template, "generated in /src");
    assert_eq!(rendered.cat_output, "/out/gen.txt");
}

#[test]
fn test_id_text_roundtrip() {
    let id = Id::hash(b"roundtrip");
    let text = id.to_string();
    assert_eq!(text.len(), 64);
    assert_eq!(text.parse::<Id>().unwrap(), id);

    assert!("not-hex".parse::<Id>().is_err());
    assert!("abcd".parse::<Id>().is_err());
}

#[test]
fn test_id_as_json_map_key() {
    let id = Id::hash(b"key");
    let map = HashMap::from([(id, "value".to_string())]);

    let encoded = serde_json::to_string(&map).unwrap();
    let decoded: HashMap<Id, String> = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.get(&id).map(String::as_str), Some("value"));
}

#[test]
fn test_graph_json_roundtrip() {
    let file_id = Id::hash(b"main.c");
    let compile = Job {
        id: Id::hash(b"compile"),
        name: "compile".into(),
        inputs: vec!["main.c".into()],
        deps: Vec::new(),
        cmds: vec![Cmd {
            exec: vec!["cc".into(), "{{source_dir}}/main.c".into()],
            ..Cmd::default()
        }],
    };
    let graph = Graph {
        source_files: HashMap::from([(file_id, "main.c".to_string())]),
        jobs: vec![compile],
    };

    let encoded = serde_json::to_string(&graph).unwrap();
    let decoded: Graph = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.jobs.len(), 1);
    assert_eq!(decoded.jobs[0].inputs, vec!["main.c".to_string()]);
    assert_eq!(
        decoded.source_files.get(&file_id).map(String::as_str),
        Some("main.c")
    );
}
