//! Pairing of build history with physical layers.

use restack_core::error::{RestackError, Result};

use crate::oci::image::OciImage;
use crate::oci::layers::{ContentLayer, HistoryEntry};

/// One build step of an image, with its layer if it produced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRecord {
    /// Position in the record sequence (earliest build step is 0)
    pub index: usize,
    pub history: HistoryEntry,
    /// Paired layer, `None` for empty-layer steps
    pub layer: Option<ContentLayer>,
    /// Index of the paired layer in the manifest
    pub layer_index: Option<usize>,
}

impl LayerRecord {
    pub fn is_empty_layer(&self) -> bool {
        self.layer.is_none()
    }
}

/// List every build step of `image`, earliest first.
pub fn layer_records(image: &OciImage) -> Result<Vec<LayerRecord>> {
    pair_history(image.history(), image.layers())
}

/// Pair history entries with layers.
///
/// The k-th entry not marked `empty_layer` owns the k-th layer. Both slices
/// are in build order, base first.
pub fn pair_history(history: &[HistoryEntry], layers: &[ContentLayer]) -> Result<Vec<LayerRecord>> {
    if history.is_empty() {
        return Err(RestackError::NoHistoryAvailable);
    }

    let non_empty = history.iter().filter(|h| !h.is_empty_layer()).count();
    if non_empty != layers.len() {
        return Err(RestackError::LayerCountMismatch {
            history: non_empty,
            layers: layers.len(),
        });
    }

    let mut next_layer = 0;
    let records = history
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let (layer, layer_index) = if entry.is_empty_layer() {
                (None, None)
            } else {
                let paired = (Some(layers[next_layer].clone()), Some(next_layer));
                next_layer += 1;
                paired
            };
            LayerRecord {
                index,
                history: entry.clone(),
                layer,
                layer_index,
            }
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn layer(n: usize) -> ContentLayer {
        ContentLayer {
            digest: format!("sha256:blob{}", n),
            diff_id: format!("sha256:diff{}", n),
            size: 100,
            media_type: crate::oci::layers::OCI_LAYER_GZIP.to_string(),
            path: PathBuf::from(format!("/blobs/{}", n)),
        }
    }

    fn step(created_by: &str, empty: bool) -> HistoryEntry {
        HistoryEntry {
            created_by: Some(created_by.to_string()),
            empty_layer: empty.then_some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_pairs_in_build_order() {
        let history = vec![
            step("ADD rootfs", false),
            step("ENV A=1", true),
            step("RUN build", false),
            step("CMD run", true),
        ];
        let layers = vec![layer(0), layer(1)];

        let records = pair_history(&history, &layers).unwrap();
        assert_eq!(records.len(), 4);

        assert_eq!(records[0].layer, Some(layer(0)));
        assert_eq!(records[0].layer_index, Some(0));
        assert!(records[1].is_empty_layer());
        assert_eq!(records[2].layer, Some(layer(1)));
        assert_eq!(records[2].history.created_by_line(), "RUN build");
        assert!(records[3].is_empty_layer());

        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.index, i);
        }
    }

    #[test]
    fn test_every_layer_referenced_once() {
        let history = vec![step("a", false), step("b", false), step("c", false)];
        let layers = vec![layer(0), layer(1), layer(2)];

        let records = pair_history(&history, &layers).unwrap();
        let indices: Vec<usize> = records.iter().filter_map(|r| r.layer_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_no_history() {
        let err = pair_history(&[], &[layer(0)]).unwrap_err();
        assert!(matches!(err, RestackError::NoHistoryAvailable));
    }

    #[test]
    fn test_more_history_than_layers() {
        let history = vec![step("a", false), step("b", false)];
        let err = pair_history(&history, &[layer(0)]).unwrap_err();
        assert!(matches!(
            err,
            RestackError::LayerCountMismatch {
                history: 2,
                layers: 1
            }
        ));
    }

    #[test]
    fn test_more_layers_than_history() {
        let history = vec![step("a", false), step("ENV", true)];
        let err = pair_history(&history, &[layer(0), layer(1)]).unwrap_err();
        assert!(matches!(
            err,
            RestackError::LayerCountMismatch {
                history: 1,
                layers: 2
            }
        ));
    }

    #[test]
    fn test_all_empty_history() {
        let history = vec![step("ENV A=1", true), step("CMD x", true)];
        let records = pair_history(&history, &[]).unwrap();
        assert!(records.iter().all(LayerRecord::is_empty_layer));
    }
}
