//! Hierarchical weighted progress tracking.
//!
//! Every queue owns a [`ProgressTree`]: an arena of weighted, optionally
//! labeled nodes behind a single mutex. Parent/child relationships are plain
//! indices inside the arena, so there is no back-pointer bookkeeping to get
//! wrong; nested queues (composite tasks) attach their whole tree as a
//! weighted *graft* edge, the only place a non-owning [`Weak`] reference
//! appears.
//!
//! A parent's completed fraction is
//! `(own completed units + Σ incomplete child fraction × pending units) / own
//! total units`, and a child's pending units are credited to its parent's
//! completed units exactly once, when the child finishes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::message::{EventSink, QueueEvent};

/// Generational index of a node inside a [`ProgressTree`] arena. Released
/// slots bump their generation, so a stale id can never alias a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
	index: u32,
	generation: u32,
}

const ROOT: NodeId = NodeId {
	index: 0,
	generation: 0,
};

/// Point-in-time unit counts of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
	pub completed_units: u64,
	pub total_units: u64,
}

impl ProgressSnapshot {
	#[must_use]
	pub const fn is_finished(&self) -> bool {
		self.total_units > 0 && self.completed_units >= self.total_units
	}
}

#[derive(Debug, Clone)]
enum ChildLink {
	Node(NodeId),
	Tree(Arc<ProgressTree>),
}

#[derive(Debug)]
struct ChildEdge {
	link: ChildLink,
	pending: u64,
	credited: bool,
}

#[derive(Debug)]
struct Node {
	total: u64,
	completed: u64,
	label: Option<String>,
	cancelled: bool,
	parent: Option<NodeId>,
	children: Vec<ChildEdge>,
}

impl Node {
	fn leaf(total: u64, label: Option<String>, parent: Option<NodeId>) -> Self {
		Self {
			total,
			completed: 0,
			label,
			cancelled: false,
			parent,
			children: Vec::new(),
		}
	}

	const fn is_finished(&self) -> bool {
		self.total > 0 && self.completed >= self.total
	}

	/// Finished and cancelled nodes drop out of label aggregation.
	const fn contributes_label(&self) -> bool {
		!self.is_finished() && !self.cancelled
	}
}

#[derive(Debug)]
struct Slot {
	generation: u32,
	node: Option<Node>,
}

#[derive(Debug)]
struct TreeInner {
	slots: Vec<Slot>,
	free: Vec<u32>,
	graft_parent: Option<Weak<ProgressTree>>,
}

impl TreeInner {
	fn get(&self, id: NodeId) -> Option<&Node> {
		self.slots
			.get(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.node.as_ref())
	}

	fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
		self.slots
			.get_mut(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.node.as_mut())
	}

	fn alloc(&mut self, node: Node) -> NodeId {
		if let Some(index) = self.free.pop() {
			let slot = &mut self.slots[index as usize];
			slot.node = Some(node);
			NodeId {
				index,
				generation: slot.generation,
			}
		} else {
			let index = u32::try_from(self.slots.len()).expect("progress arena exhausted");
			self.slots.push(Slot {
				generation: 0,
				node: Some(node),
			});
			NodeId {
				index,
				generation: 0,
			}
		}
	}

	fn release(&mut self, id: NodeId) {
		if let Some(slot) = self
			.slots
			.get_mut(id.index as usize)
			.filter(|slot| slot.generation == id.generation && slot.node.is_some())
		{
			slot.node = None;
			slot.generation += 1;
			self.free.push(id.index);
		}
	}

	fn release_subtree(&mut self, id: NodeId) {
		let children = self
			.get(id)
			.map(|node| {
				node.children
					.iter()
					.filter_map(|edge| match &edge.link {
						ChildLink::Node(child) => Some(*child),
						ChildLink::Tree(_) => None,
					})
					.collect::<Vec<_>>()
			})
			.unwrap_or_default();

		for child in children {
			self.release_subtree(child);
		}

		self.release(id);
	}

	/// Credits `id`'s pending units to its ancestors while they keep
	/// finishing, all within the arena.
	fn cascade_finish(&mut self, id: NodeId) {
		let mut current = id;

		while let Some(node) = self.get(current) {
			if !node.is_finished() {
				break;
			}

			let Some(parent_id) = node.parent else { break };

			let Some(parent) = self.get_mut(parent_id) else {
				break;
			};

			let Some(edge) = parent.children.iter_mut().find(
				|edge| matches!(edge.link, ChildLink::Node(child) if child == current),
			) else {
				break;
			};

			if edge.credited {
				break;
			}

			edge.credited = true;
			parent.completed += edge.pending;

			current = parent_id;
		}
	}
}

/// A weighted, labeled completion tracker owned by a single queue.
#[derive(Debug)]
pub struct ProgressTree {
	inner: Mutex<TreeInner>,
	events: EventSink,
}

impl ProgressTree {
	/// A standalone tree, not wired to any queue.
	#[must_use]
	pub fn new(total_units: u64) -> Arc<Self> {
		Self::with_sink(total_units, None, EventSink::detached())
	}

	pub(crate) fn with_sink(
		total_units: u64,
		label: Option<String>,
		events: EventSink,
	) -> Arc<Self> {
		Arc::new(Self {
			inner: Mutex::new(TreeInner {
				slots: vec![Slot {
					generation: 0,
					node: Some(Node::leaf(total_units, label, None)),
				}],
				free: Vec::new(),
				graft_parent: None,
			}),
			events,
		})
	}

	#[must_use]
	pub const fn root(&self) -> NodeId {
		ROOT
	}

	/// Grow a node's total unit count, reserving room for children about to
	/// be attached. The root only ever grows this way while the owning queue
	/// holds work.
	pub fn reserve(self: &Arc<Self>, id: NodeId, units: u64) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(id) {
				node.total += units;
			}
		}
		self.changed();
	}

	/// Attach a new child under `parent`, weighted at `pending_units` of the
	/// parent's total. The caller is responsible for having reserved that
	/// weight in the parent's total beforehand.
	pub fn add_child(
		self: &Arc<Self>,
		parent: NodeId,
		total_units: u64,
		pending_units: u64,
		label: Option<String>,
	) -> NodeId {
		assert!(pending_units > 0, "pending unit count must be positive");

		let id = {
			let mut inner = self.inner.lock();
			let id = inner.alloc(Node::leaf(total_units, label, Some(parent)));
			if let Some(parent) = inner.get_mut(parent) {
				parent.children.push(ChildEdge {
					link: ChildLink::Node(id),
					pending: pending_units,
					credited: false,
				});
			}
			id
		};
		self.changed();
		id
	}

	/// Attach a whole other tree (a nested queue's progress) as a weighted
	/// child of this tree's root, wiring the subtree's non-owning
	/// back-reference so its changes propagate upward.
	pub(crate) fn graft_child(self: &Arc<Self>, subtree: &Arc<Self>, pending_units: u64) {
		assert!(pending_units > 0, "pending unit count must be positive");

		self.inner.lock().slots[ROOT.index as usize]
			.node
			.as_mut()
			.expect("progress tree root is never released")
			.children
			.push(ChildEdge {
				link: ChildLink::Tree(Arc::clone(subtree)),
				pending: pending_units,
				credited: false,
			});

		subtree.inner.lock().graft_parent = Some(Arc::downgrade(self));

		self.changed();
	}

	pub fn set_label(self: &Arc<Self>, id: NodeId, label: Option<String>) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(id) {
				node.label = label.filter(|label| !label.is_empty());
			}
		}
		self.changed();
	}

	pub fn set_total_units(self: &Arc<Self>, id: NodeId, units: u64) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(id) {
				node.total = units;
			}
			inner.cascade_finish(id);
		}
		self.changed();
	}

	pub fn set_completed_units(self: &Arc<Self>, id: NodeId, units: u64) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(id) {
				node.completed = units;
			}
			inner.cascade_finish(id);
		}
		self.changed();
	}

	pub fn add_completed_units(self: &Arc<Self>, id: NodeId, units: u64) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(id) {
				node.completed += units;
			}
			inner.cascade_finish(id);
		}
		self.changed();
	}

	/// Unconditionally drive a node to its finished state, `completed ==
	/// total`, cancelled or not. A node that never declared units still gets
	/// a non-zero total so its parents release it from their aggregation.
	pub(crate) fn force_complete(self: &Arc<Self>, id: NodeId, cancelled: bool) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(id) {
				if node.total == 0 {
					node.total = 1;
				}
				node.completed = node.total;
				node.cancelled |= cancelled;
			}
			inner.cascade_finish(id);
		}
		self.changed();
	}

	/// [`force_complete`](Self::force_complete) for the root; used when a
	/// composite task finalizes its internal queue's whole tree.
	pub(crate) fn force_finish_root(self: &Arc<Self>, cancelled: bool) {
		self.force_complete(ROOT, cancelled);
	}

	pub(crate) fn mark_root_cancelled(self: &Arc<Self>) {
		{
			let mut inner = self.inner.lock();
			if let Some(node) = inner.get_mut(ROOT) {
				node.cancelled = true;
			}
		}
		self.changed();
	}

	/// Detach every child and zero the root, restoring the known baseline.
	/// Only meaningful while the owning queue is empty.
	pub(crate) fn reset_to_baseline(self: &Arc<Self>) {
		{
			let mut inner = self.inner.lock();
			let root = inner
				.get_mut(ROOT)
				.expect("progress tree root is never released");

			let stale = std::mem::take(&mut root.children);
			root.total = 0;
			root.completed = 0;
			root.cancelled = false;

			for edge in stale {
				if let ChildLink::Node(id) = edge.link {
					inner.release_subtree(id);
				}
			}
		}
		self.changed();
	}

	/// The post-drain resting state: one fully completed unit, so observers
	/// keep reading a finished fraction until new work arrives.
	pub(crate) fn reset_idle(self: &Arc<Self>) {
		{
			let mut inner = self.inner.lock();
			if let Some(root) = inner.get_mut(ROOT) {
				root.total = 1;
				root.completed = 1;
			}
		}
		self.changed();
	}

	#[must_use]
	pub fn snapshot(&self, id: NodeId) -> Option<ProgressSnapshot> {
		self.inner.lock().get(id).map(|node| ProgressSnapshot {
			completed_units: node.completed,
			total_units: node.total,
		})
	}

	#[must_use]
	pub fn root_snapshot(&self) -> ProgressSnapshot {
		self.snapshot(ROOT)
			.expect("progress tree root is never released")
	}

	/// Whether the whole tree reached completion. An empty tree (total of
	/// zero) counts as finished: there is nothing left to do.
	#[must_use]
	pub fn is_finished(&self) -> bool {
		let snapshot = self.root_snapshot();
		snapshot.total_units == 0 || snapshot.is_finished()
	}

	pub(crate) fn is_root_cancelled(&self) -> bool {
		self.inner
			.lock()
			.get(ROOT)
			.is_some_and(|node| node.cancelled)
	}

	#[must_use]
	pub fn fraction(&self) -> f64 {
		self.fraction_of(ROOT)
	}

	/// Weighted fraction in `0.0..=1.0`. Locks are taken one node at a time,
	/// never across a graft boundary.
	#[must_use]
	pub fn fraction_of(&self, id: NodeId) -> f64 {
		let (completed, total, edges) = {
			let inner = self.inner.lock();
			let Some(node) = inner.get(id) else {
				return 0.0;
			};
			(
				node.completed,
				node.total,
				node.children
					.iter()
					.filter(|edge| !edge.credited)
					.map(|edge| (edge.link.clone(), edge.pending))
					.collect::<Vec<_>>(),
			)
		};

		if total == 0 {
			return 0.0;
		}

		let mut units = completed as f64;
		for (link, pending) in edges {
			let child_fraction = match link {
				ChildLink::Node(child) => self.fraction_of(child),
				ChildLink::Tree(tree) => tree.fraction(),
			};
			units += child_fraction * pending as f64;
		}

		(units / total as f64).min(1.0)
	}

	#[must_use]
	pub fn label(&self, id: NodeId) -> Option<String> {
		self.inner.lock().get(id).and_then(|node| node.label.clone())
	}

	/// Labels of direct, still-active children: deduplicated and sorted.
	#[must_use]
	pub fn child_labels(&self, id: NodeId) -> Vec<String> {
		let mut labels = Vec::new();
		self.collect_child_labels(id, false, &mut labels);
		labels.sort();
		labels.dedup();
		labels
	}

	/// Labels of all still-active descendants, crossing into nested queues:
	/// deduplicated and sorted.
	#[must_use]
	pub fn deep_labels(&self, id: NodeId) -> Vec<String> {
		let mut labels = Vec::new();
		self.collect_child_labels(id, true, &mut labels);
		labels.sort();
		labels.dedup();
		labels
	}

	/// Own label combined with the labels of direct children.
	#[must_use]
	pub fn combined_label(&self, id: NodeId) -> Option<String> {
		Self::join_labels(self.label(id), &self.child_labels(id))
	}

	/// Own label combined with the labels of all descendants.
	#[must_use]
	pub fn deep_label(&self, id: NodeId) -> Option<String> {
		Self::join_labels(self.label(id), &self.deep_labels(id))
	}

	#[must_use]
	pub fn root_deep_label(&self) -> Option<String> {
		self.deep_label(ROOT)
	}

	fn join_labels(own: Option<String>, children: &[String]) -> Option<String> {
		let children = children.join(", ");
		match own {
			own if children.is_empty() => own,
			None => Some(children),
			Some(own) => Some(format!("{own} - {children}")),
		}
	}

	fn collect_child_labels(&self, id: NodeId, deep: bool, out: &mut Vec<String>) {
		let edges = {
			let inner = self.inner.lock();
			let Some(node) = inner.get(id) else { return };
			node.children
				.iter()
				.map(|edge| edge.link.clone())
				.collect::<Vec<_>>()
		};

		for link in edges {
			match link {
				ChildLink::Node(child) => {
					let Some((label, active)) = self.inner.lock().get(child).map(|node| {
						(node.label.clone(), node.contributes_label())
					}) else {
						continue;
					};
					if !active {
						continue;
					}
					if let Some(label) = label {
						out.push(label);
					}
					if deep {
						self.collect_child_labels(child, true, out);
					}
				}
				ChildLink::Tree(tree) => {
					if tree.is_finished() || tree.is_root_cancelled() {
						continue;
					}
					if let Some(label) = tree.label(ROOT) {
						out.push(label);
					}
					if deep {
						tree.collect_child_labels(ROOT, true, out);
					}
				}
			}
		}
	}

	/// Publish a change event on the owning queue's channel and propagate
	/// upward across graft boundaries, crediting this tree into its parent
	/// if it just finished. No lock is held while another tree is visited.
	fn changed(self: &Arc<Self>) {
		self.events.emit(QueueEvent::ProgressChanged);

		let graft_parent = self.inner.lock().graft_parent.clone();

		if let Some(parent) = graft_parent.and_then(|parent| parent.upgrade()) {
			parent.child_tree_changed(self);
		}
	}

	fn child_tree_changed(self: &Arc<Self>, child: &Arc<Self>) {
		if child.is_finished() {
			let mut inner = self.inner.lock();
			let root = inner
				.get_mut(ROOT)
				.expect("progress tree root is never released");

			if let Some(edge) = root.children.iter_mut().find(|edge| {
				!edge.credited
					&& matches!(&edge.link, ChildLink::Tree(tree) if Arc::ptr_eq(tree, child))
			}) {
				edge.credited = true;
				root.completed += edge.pending;
			}
		}

		self.changed();
	}
}

/// A cheap handle to one node of a shared tree, given to task controllers so
/// interactive bodies can publish fractional progress mid-run.
#[derive(Debug, Clone)]
pub struct NodeRef {
	tree: Arc<ProgressTree>,
	id: NodeId,
}

impl NodeRef {
	pub(crate) fn new(tree: Arc<ProgressTree>, id: NodeId) -> Self {
		Self { tree, id }
	}

	#[must_use]
	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn set_label(&self, label: Option<String>) {
		self.tree.set_label(self.id, label);
	}

	pub fn set_total_units(&self, units: u64) {
		self.tree.set_total_units(self.id, units);
	}

	pub fn set_completed_units(&self, units: u64) {
		self.tree.set_completed_units(self.id, units);
	}

	pub fn add_completed_units(&self, units: u64) {
		self.tree.add_completed_units(self.id, units);
	}

	#[must_use]
	pub fn snapshot(&self) -> Option<ProgressSnapshot> {
		self.tree.snapshot(self.id)
	}

	pub(crate) fn force_complete(&self, cancelled: bool) {
		self.tree.force_complete(self.id, cancelled);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn baseline_reset_detaches_children_and_frees_slots() {
		let tree = ProgressTree::new(0);
		let root = tree.root();

		tree.reserve(root, 100);
		let child = tree.add_child(root, 1, 100, Some("gone".into()));

		tree.reset_to_baseline();

		assert_eq!(tree.snapshot(child), None);
		assert_eq!(
			tree.root_snapshot(),
			ProgressSnapshot {
				completed_units: 0,
				total_units: 0,
			}
		);
		assert_eq!(tree.child_labels(root), Vec::<String>::new());

		// The released slot is recycled under a new generation, so the stale
		// id stays inert.
		tree.reserve(root, 100);
		let replacement = tree.add_child(root, 1, 100, None);
		assert_ne!(child, replacement);

		tree.add_completed_units(child, 1);
		assert_eq!(
			tree.snapshot(replacement).map(|s| s.completed_units),
			Some(0)
		);
	}

	#[test]
	fn force_complete_gives_unit_less_nodes_a_total() {
		let tree = ProgressTree::new(0);
		let root = tree.root();

		tree.reserve(root, 100);
		let child = tree.add_child(root, 0, 100, None);

		tree.force_complete(child, false);

		assert!(tree.snapshot(child).is_some_and(|s| s.is_finished()));
		assert!(tree.is_finished());
	}

	#[test]
	fn idle_reset_keeps_the_tree_finished() {
		let tree = ProgressTree::new(0);
		let root = tree.root();

		tree.reserve(root, 100);
		let child = tree.add_child(root, 1, 100, None);
		tree.set_completed_units(child, 1);

		tree.reset_idle();

		assert_eq!(
			tree.root_snapshot(),
			ProgressSnapshot {
				completed_units: 1,
				total_units: 1,
			}
		);
		assert!(tree.is_finished());
	}
}
