use atomic_task_queue::ProgressTree;

#[test]
fn weighted_fractions_aggregate_across_children() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.reserve(root, 200);
	let a = tree.add_child(root, 2, 100, None);
	let b = tree.add_child(root, 4, 100, None);

	assert!((tree.fraction() - 0.0).abs() < f64::EPSILON);

	tree.add_completed_units(a, 1);
	assert!((tree.fraction() - 0.25).abs() < 1e-9);

	tree.add_completed_units(a, 1);
	assert!((tree.fraction() - 0.5).abs() < 1e-9);

	tree.set_completed_units(b, 2);
	assert!((tree.fraction() - 0.75).abs() < 1e-9);

	tree.set_completed_units(b, 4);
	assert!((tree.fraction() - 1.0).abs() < f64::EPSILON);
	assert!(tree.is_finished());
}

#[test]
fn finished_children_credit_their_parent_exactly_once() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.reserve(root, 100);
	let child = tree.add_child(root, 1, 100, None);

	tree.set_completed_units(child, 1);
	assert_eq!(tree.root_snapshot().completed_units, 100);

	// Further mutations on a finished child must not credit again.
	tree.set_completed_units(child, 1);
	tree.add_completed_units(child, 3);
	assert_eq!(tree.root_snapshot().completed_units, 100);
}

#[test]
fn labels_are_deduplicated_and_sorted() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.reserve(root, 300);
	let _a = tree.add_child(root, 1, 100, Some("walk".into()));
	let _b = tree.add_child(root, 1, 100, Some("analyze".into()));
	let _c = tree.add_child(root, 1, 100, Some("walk".into()));

	assert_eq!(tree.child_labels(root), ["analyze", "walk"]);
	assert_eq!(tree.deep_label(root), Some("analyze, walk".to_string()));
}

#[test]
fn combined_stops_at_direct_children_while_deep_recurses() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.set_label(root, Some("job".into()));
	tree.reserve(root, 100);
	let stage = tree.add_child(root, 10, 100, Some("stage".into()));
	let _leaf = tree.add_child(stage, 1, 5, Some("leaf".into()));

	assert_eq!(tree.combined_label(root), Some("job - stage".to_string()));
	assert_eq!(tree.deep_label(root), Some("job - leaf, stage".to_string()));
	assert_eq!(tree.combined_label(stage), Some("stage - leaf".to_string()));
}

#[test]
fn label_changes_propagate_to_every_ancestor() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.reserve(root, 100);
	let stage = tree.add_child(root, 10, 100, None);
	let leaf = tree.add_child(stage, 1, 5, None);

	assert_eq!(tree.deep_label(root), None);

	tree.set_label(leaf, Some("scanning".into()));
	assert_eq!(tree.deep_label(root), Some("scanning".to_string()));
	assert_eq!(tree.deep_label(stage), Some("scanning".to_string()));

	tree.set_label(leaf, None);
	assert_eq!(tree.deep_label(root), None);
	assert_eq!(tree.deep_label(stage), None);
}

#[test]
fn finished_children_drop_out_of_label_aggregation() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.reserve(root, 200);
	let busy = tree.add_child(root, 1, 100, Some("busy".into()));
	let done = tree.add_child(root, 1, 100, Some("done".into()));

	assert_eq!(tree.child_labels(root), ["busy", "done"]);

	tree.set_completed_units(done, 1);
	assert_eq!(tree.child_labels(root), ["busy"]);
	assert_eq!(tree.deep_label(root), Some("busy".to_string()));

	tree.set_completed_units(busy, 1);
	assert_eq!(tree.deep_label(root), None);
}

#[test]
fn empty_labels_clear_like_none() {
	let tree = ProgressTree::new(0);
	let root = tree.root();

	tree.reserve(root, 100);
	let child = tree.add_child(root, 1, 100, Some("visible".into()));

	tree.set_label(child, Some(String::new()));
	assert_eq!(tree.child_labels(root), Vec::<String>::new());
}
