//! Property tests: compiler determinism, merge policy, path walks.

use proptest::prelude::*;
use serde_json::{json, Value};

use flowrun::graphs::{compile, VisualGraph};
use flowrun::utils::json_ext::{merge_io, resolve_path};
use flowrun::workers::WorkerRegistry;

mod common;
use common::*;

/// Distinct lowercase identifiers usable as node ids.
fn id_vec() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-z][a-z0-9]{0,7}", 1..8)
        .prop_map(|set| set.into_iter().collect())
}

fn chain_graph(ids: &[String]) -> VisualGraph {
    VisualGraph {
        nodes: ids.iter().map(|id| section(id)).collect(),
        edges: ids
            .windows(2)
            .enumerate()
            .map(|(i, pair)| edge(&format!("e{i}"), &pair[0], &pair[1]))
            .collect(),
    }
}

proptest! {
    #[test]
    fn compiling_twice_is_structurally_equal(ids in id_vec()) {
        let registry = WorkerRegistry::with_builtins();
        let graph = chain_graph(&ids);
        let first = compile(&graph, &registry).unwrap();
        let second = compile(&graph, &registry).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn compiled_ids_match_input_ids_exactly(ids in id_vec()) {
        let registry = WorkerRegistry::with_builtins();
        let graph = chain_graph(&ids);
        let oeg = compile(&graph, &registry).unwrap();
        for id in &ids {
            prop_assert!(oeg.nodes.contains_key(id));
            prop_assert_eq!(&oeg.nodes[id].id, id);
        }
        prop_assert_eq!(oeg.nodes.len(), ids.len());
        // A chain has exactly one entry and one terminal.
        prop_assert_eq!(oeg.entry_nodes.len(), 1);
        prop_assert_eq!(oeg.terminal_nodes.len(), 1);
    }

    #[test]
    fn chains_with_a_back_edge_never_compile(ids in id_vec()) {
        prop_assume!(ids.len() >= 2);
        let registry = WorkerRegistry::with_builtins();
        let mut graph = chain_graph(&ids);
        graph.edges.push(edge("back", ids.last().unwrap(), &ids[0]));
        prop_assert!(compile(&graph, &registry).is_err());
    }

    #[test]
    fn merge_keeps_every_patch_key(
        base in proptest::collection::btree_map("[a-c]", 0i64..100, 0..4),
        patch in proptest::collection::btree_map("[b-e]", 0i64..100, 0..4),
    ) {
        let base_value = Value::Object(
            base.iter().map(|(k, v)| (k.clone(), json!(v))).collect()
        );
        let patch_value = Value::Object(
            patch.iter().map(|(k, v)| (k.clone(), json!(v))).collect()
        );
        let merged = merge_io(base_value, patch_value);
        let merged = merged.as_object().unwrap();
        // Patch keys always win; base-only keys pass through.
        for (k, v) in &patch {
            prop_assert_eq!(merged.get(k.as_str()), Some(&json!(v)));
        }
        for (k, v) in &base {
            if !patch.contains_key(k) {
                prop_assert_eq!(merged.get(k.as_str()), Some(&json!(v)));
            }
        }
        prop_assert!(merged.len() <= base.len() + patch.len());
    }

    #[test]
    fn resolve_path_finds_planted_values(
        key in "[a-z]{1,6}",
        nested in "[a-z]{1,6}",
        value in 0i64..1000,
    ) {
        let mut inner = serde_json::Map::new();
        inner.insert(nested.clone(), json!(value));
        let mut outer = serde_json::Map::new();
        outer.insert(key.clone(), Value::Object(inner));
        let doc = Value::Object(outer);

        let path = format!("{key}.{nested}");
        prop_assert_eq!(resolve_path(&doc, &path), Some(json!(value)));
        prop_assert_eq!(resolve_path(&doc, &format!("{key}.missing")), None);
    }
}
