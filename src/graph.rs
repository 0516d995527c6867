//! Layer ancestry graph and storage accounting.
//!
//! The daemon hands back a flat list of images where every layer points at
//! its parent. This module rebuilds the forest, traces each tagged image down
//! to its root and works out which layers are reachable, which are shared by
//! several tags and which are dangling.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::progress::Notice;

/// Repo tag the daemon reports for images without a name.
pub const UNTAGGED: &str = "<none>:<none>";

/// One entry of the daemon's image list. Every layer is an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    /// `None` for root layers.
    pub parent_id: Option<String>,
    /// Bytes unique to this layer.
    pub size: u64,
    /// Bytes of this layer plus all of its ancestors.
    pub virtual_size: u64,
    pub repo_tags: Vec<String>,
}

impl ImageRecord {
    /// First repo tag that is not the untagged sentinel.
    pub fn tag(&self) -> Option<&str> {
        self.repo_tags
            .iter()
            .map(String::as_str)
            .find(|t| !t.is_empty() && *t != UNTAGGED)
    }

    pub fn is_tagged(&self) -> bool {
        self.tag().is_some()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("image {0} is listed more than once")]
    DuplicateId(String),

    #[error("parent chain of image {0} loops back on itself")]
    CycleDetected(String),

    #[error("image {image} references parent {parent}, which is not in the store")]
    MissingParent { image: String, parent: String },

    #[error("no such image: {0}")]
    UnknownImage(String),
}

/// Read-only index over one snapshot of the image list.
#[derive(Debug, Default)]
pub struct AncestryIndex {
    images: HashMap<String, ImageRecord>,
    children: HashMap<String, HashSet<String>>,
    /// Ids of tagged images, in the order the daemon listed them.
    tagged: Vec<String>,
}

impl AncestryIndex {
    pub fn build(records: Vec<ImageRecord>) -> Result<Self, GraphError> {
        let mut index = Self::default();

        for record in records {
            if index.images.contains_key(&record.id) {
                return Err(GraphError::DuplicateId(record.id));
            }
            if let Some(parent) = &record.parent_id {
                index
                    .children
                    .entry(parent.clone())
                    .or_default()
                    .insert(record.id.clone());
            }
            if record.is_tagged() {
                index.tagged.push(record.id.clone());
            }
            index.images.insert(record.id.clone(), record);
        }

        Ok(index)
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.images.values()
    }

    pub fn tagged(&self) -> impl Iterator<Item = &ImageRecord> {
        self.tagged.iter().filter_map(|id| self.images.get(id))
    }

    /// Ids of the layers built directly on top of `id`.
    pub fn children(&self, id: &str) -> Option<&HashSet<String>> {
        self.children.get(id)
    }

    /// Follow parent links from `id` down to its root.
    pub fn trace(&self, id: &str) -> Result<LayerChain<'_>, GraphError> {
        let mut current = self
            .images
            .get(id)
            .ok_or_else(|| GraphError::UnknownImage(id.to_string()))?;

        let mut chain = LayerChain::default();
        chain.push(current);

        while let Some(parent) = &current.parent_id {
            let next = self
                .images
                .get(parent)
                .ok_or_else(|| GraphError::MissingParent {
                    image: current.id.clone(),
                    parent: parent.clone(),
                })?;
            if !chain.push(next) {
                return Err(GraphError::CycleDetected(id.to_string()));
            }
            current = next;
        }

        Ok(chain)
    }
}

/// The layers an image is built from, tip first.
#[derive(Debug, Default)]
pub struct LayerChain<'a> {
    layers: Vec<&'a ImageRecord>,
    seen: HashSet<&'a str>,
}

impl<'a> LayerChain<'a> {
    /// Returns false if the layer was already in the chain.
    fn push(&mut self, layer: &'a ImageRecord) -> bool {
        if !self.seen.insert(layer.id.as_str()) {
            return false;
        }
        self.layers.push(layer);
        true
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a ImageRecord> + '_ {
        self.layers.iter().copied()
    }

    /// Physical bytes of every layer in the chain, saturating at `u64::MAX`.
    pub fn size(&self) -> u64 {
        self.layers
            .iter()
            .fold(0u64, |total, l| total.saturating_add(l.size))
    }
}

/// A layer count and the physical bytes those layers hold. Byte totals
/// saturate rather than wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerTotals {
    pub layers: usize,
    pub size: u64,
}

impl LayerTotals {
    fn add(&mut self, layer: &ImageRecord) {
        self.layers += 1;
        self.size = self.size.saturating_add(layer.size);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReachableTotals {
    pub layers: usize,
    pub size: u64,
    /// Sum of each tag's virtual size. Shared ancestors are counted once per
    /// tag: this is what pulling every tag on its own would cost.
    pub virtual_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DanglingTotals {
    pub layers: usize,
    pub size: u64,
    /// Unreachable layers nothing else is built on.
    pub heads: usize,
}

/// Per-tag line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagStats {
    pub tag: String,
    pub id: String,
    /// Number of layers in the tag's chain, itself included.
    pub layers: usize,
    /// Physical bytes of the tagged layer alone.
    pub size: u64,
    /// Physical bytes of the whole chain.
    pub chain_size: u64,
    pub virtual_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub total: LayerTotals,
    pub reachable: ReachableTotals,
    pub shared: LayerTotals,
    pub dangling: DanglingTotals,
    pub tags: Vec<TagStats>,
}

/// Build the ancestry index for `images` and account for every layer.
pub fn build_stats(
    images: Vec<ImageRecord>,
    notice: &dyn Notice,
) -> Result<StatsReport, GraphError> {
    let index = AncestryIndex::build(images)?;
    let report = account(&index)?;
    notice.notice(&format!(
        "Traced {} tagged images over {} layers",
        report.tags.len(),
        report.total.layers
    ));
    Ok(report)
}

/// Compute the report for an already built index.
pub fn account(index: &AncestryIndex) -> Result<StatsReport, GraphError> {
    let mut report = StatsReport::default();
    let mut found: HashSet<&str> = HashSet::new();
    let mut shared: HashSet<&str> = HashSet::new();

    for image in index.tagged() {
        let chain = index.trace(&image.id)?;
        tracing::debug!(id = %image.id, layers = chain.len(), "traced tagged image");

        report.tags.push(TagStats {
            tag: image.tag().unwrap_or(UNTAGGED).to_string(),
            id: image.id.clone(),
            layers: chain.len(),
            size: image.size,
            chain_size: chain.size(),
            virtual_size: image.virtual_size,
        });
        report.reachable.virtual_size = report
            .reachable
            .virtual_size
            .saturating_add(image.virtual_size);

        for layer in chain.iter() {
            if found.contains(layer.id.as_str()) {
                if shared.insert(layer.id.as_str()) {
                    report.shared.add(layer);
                }
            } else {
                found.insert(layer.id.as_str());
                report.reachable.layers += 1;
                report.reachable.size = report.reachable.size.saturating_add(layer.size);
            }
        }
    }

    for image in index.images() {
        report.total.add(image);
        if !found.contains(image.id.as_str()) {
            report.dangling.layers += 1;
            report.dangling.size = report.dangling.size.saturating_add(image.size);
            if index.children(&image.id).is_none() {
                report.dangling.heads += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::testing::Recorder;

    fn layer(id: &str, parent: &str, size: u64) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            parent_id: (!parent.is_empty()).then(|| parent.to_string()),
            size,
            virtual_size: size,
            repo_tags: vec![UNTAGGED.to_string()],
        }
    }

    fn tagged(id: &str, parent: &str, size: u64, virtual_size: u64, tag: &str) -> ImageRecord {
        ImageRecord {
            virtual_size,
            repo_tags: vec![tag.to_string()],
            ..layer(id, parent, size)
        }
    }

    fn stats(images: Vec<ImageRecord>) -> StatsReport {
        build_stats(images, &Recorder::default()).unwrap()
    }

    #[test]
    fn empty_store_reports_zeroes() {
        let report = stats(vec![]);
        assert_eq!(report, StatsReport::default());
    }

    #[test]
    fn two_tags_sharing_a_base() {
        let report = stats(vec![
            layer("a", "", 10),
            tagged("b", "a", 5, 15, "app:v1"),
            tagged("c", "a", 7, 17, "app:v2"),
        ]);

        assert_eq!(report.total, LayerTotals { layers: 3, size: 22 });
        assert_eq!(report.reachable.layers, 3);
        assert_eq!(report.reachable.size, 22);
        assert_eq!(report.reachable.virtual_size, 32);
        assert_eq!(report.shared, LayerTotals { layers: 1, size: 10 });
        assert_eq!(report.dangling, DanglingTotals::default());

        let mut tags: Vec<_> = report
            .tags
            .iter()
            .map(|t| (t.tag.as_str(), t.layers, t.chain_size, t.virtual_size))
            .collect();
        tags.sort();
        assert_eq!(tags, vec![("app:v1", 2, 15, 15), ("app:v2", 2, 17, 17)]);
    }

    #[test]
    fn total_includes_dangling_layers() {
        let report = stats(vec![
            layer("base", "", 100),
            tagged("app", "base", 20, 120, "app:latest"),
            layer("old-base", "", 40),
            layer("old-app", "old-base", 8),
        ]);

        assert_eq!(report.total.size, 168);
        assert_eq!(report.reachable.size, 120);
        assert_eq!(report.dangling.layers, 2);
        assert_eq!(report.dangling.size, 48);
        assert_eq!(report.dangling.heads, 1);
    }

    #[test]
    fn single_tag_never_counts_as_shared() {
        let report = stats(vec![
            layer("a", "", 10),
            layer("b", "a", 10),
            tagged("c", "b", 10, 30, "solo:1"),
        ]);
        assert_eq!(report.shared, LayerTotals::default());
        assert_eq!(report.reachable.size, 30);
    }

    #[test]
    fn shared_bytes_grow_with_more_tags_on_a_common_base() {
        let mut images = vec![layer("base", "", 50), layer("mid", "base", 25)];
        images.push(tagged("t1", "mid", 1, 76, "t:1"));
        let one = stats(images.clone()).shared.size;

        images.push(tagged("t2", "mid", 2, 77, "t:2"));
        let two = stats(images.clone()).shared.size;

        images.push(tagged("t3", "base", 3, 53, "t:3"));
        let three = stats(images).shared.size;

        assert_eq!(one, 0);
        assert_eq!(two, 75);
        assert!(three >= two);
    }

    #[test]
    fn build_stats_is_idempotent() {
        let images = vec![
            layer("a", "", 3),
            tagged("b", "a", 4, 7, "x:1"),
            tagged("c", "b", 5, 12, "x:2"),
            layer("d", "", 9),
        ];
        assert_eq!(stats(images.clone()), stats(images));
    }

    #[test]
    fn tag_order_follows_input() {
        let report = stats(vec![
            tagged("z", "", 1, 1, "zeta:1"),
            tagged("a", "", 1, 1, "alpha:1"),
        ]);
        let tags: Vec<_> = report.tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(tags, vec!["zeta:1", "alpha:1"]);
    }

    #[test]
    fn untagged_sentinel_is_skipped_when_naming_tags() {
        let image = ImageRecord {
            repo_tags: vec![UNTAGGED.to_string(), "real:tag".to_string()],
            ..layer("x", "", 1)
        };
        assert_eq!(image.tag(), Some("real:tag"));
        assert!(!layer("y", "", 1).is_tagged());
        assert!(
            !ImageRecord {
                repo_tags: vec![],
                ..layer("z", "", 1)
            }
            .is_tagged()
        );
    }

    #[test]
    fn root_image_traces_to_itself() {
        let index = AncestryIndex::build(vec![layer("root", "", 1)]).unwrap();
        let chain = index.trace("root").unwrap();
        let ids: Vec<_> = chain.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["root"]);
    }

    #[test]
    fn long_chain_traces_every_layer() {
        let n = 50;
        let mut images = vec![layer("l0", "", 1)];
        for i in 1..n {
            images.push(layer(&format!("l{i}"), &format!("l{}", i - 1), 1));
        }
        let index = AncestryIndex::build(images).unwrap();
        let chain = index.trace(&format!("l{}", n - 1)).unwrap();
        assert_eq!(chain.len(), n);
        assert_eq!(chain.size(), n as u64);
    }

    #[test]
    fn looped_chain_is_rejected() {
        let index = AncestryIndex::build(vec![
            layer("a", "c", 1),
            layer("b", "a", 1),
            layer("c", "b", 1),
        ])
        .unwrap();
        assert_eq!(
            index.trace("c").unwrap_err(),
            GraphError::CycleDetected("c".into())
        );
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let index = AncestryIndex::build(vec![layer("a", "a", 1)]).unwrap();
        assert!(matches!(index.trace("a"), Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn cycle_under_a_tag_aborts_the_report() {
        let err = build_stats(
            vec![layer("a", "b", 1), tagged("b", "a", 1, 2, "loop:1")],
            &Recorder::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = AncestryIndex::build(vec![layer("a", "", 1), layer("a", "", 2)]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("a".into()));
    }

    #[test]
    fn missing_parent_under_a_tag_is_an_error() {
        let err = build_stats(
            vec![tagged("b", "gone", 1, 2, "broken:1")],
            &Recorder::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingParent {
                image: "b".into(),
                parent: "gone".into()
            }
        );
    }

    #[test]
    fn missing_parent_of_untraced_layer_is_tolerated() {
        let report = stats(vec![layer("orphan", "gone", 4)]);
        assert_eq!(report.total.size, 4);
        assert_eq!(report.dangling.layers, 1);
    }

    #[test]
    fn unknown_start_id() {
        let index = AncestryIndex::build(vec![]).unwrap();
        assert_eq!(index.images().count(), 0);
        assert_eq!(
            index.trace("nope").unwrap_err(),
            GraphError::UnknownImage("nope".into())
        );
    }

    #[test]
    fn children_index_tracks_direct_descendants() {
        let index = AncestryIndex::build(vec![
            layer("a", "", 1),
            layer("b", "a", 1),
            layer("c", "a", 1),
            layer("d", "b", 1),
        ])
        .unwrap();
        let kids = index.children("a").unwrap();
        assert_eq!(kids.len(), 2);
        assert!(kids.contains("b") && kids.contains("c"));
        assert!(index.children("d").is_none());
        assert_eq!(index.images().count(), 4);
    }

    #[test]
    fn huge_sizes_saturate_instead_of_overflowing() {
        let half = u64::MAX / 2 + 1;
        let report = stats(vec![
            layer("a", "", half),
            layer("b", "", half),
            tagged("c", "a", half, u64::MAX, "big:1"),
            tagged("d", "a", 1, u64::MAX, "big:2"),
        ]);

        assert_eq!(report.total.layers, 4);
        assert_eq!(report.total.size, u64::MAX);
        assert_eq!(report.reachable.size, u64::MAX);
        assert_eq!(report.reachable.virtual_size, u64::MAX);
        assert_eq!(report.shared, LayerTotals { layers: 1, size: half });
        assert_eq!(report.dangling, DanglingTotals { layers: 1, size: half, heads: 1 });

        let big1 = report.tags.iter().find(|t| t.tag == "big:1").unwrap();
        assert_eq!(big1.chain_size, u64::MAX);
    }

    #[test]
    fn build_stats_reports_progress() {
        let recorder = Recorder::default();
        build_stats(vec![tagged("a", "", 1, 1, "a:1")], &recorder).unwrap();
        assert_eq!(
            recorder.messages(),
            vec!["Traced 1 tagged images over 1 layers".to_string()]
        );
    }
}
