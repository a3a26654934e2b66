//! Selection of streamlines that touch one or more anatomical masks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::streamline::StreamlineSet;
use crate::volume::AnatomicalMask;


/// Which points of a streamline must fall inside the masks for it to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRule {
    /// Any point along the streamline.
    AnyPoint,
    /// At least one of the two terminal points.
    EitherEndpoint,
}


/// Return one boolean per streamline, true if the streamline touches the union of `masks` under `rule`.
///
/// Masks on a different voxel grid are resampled (nearest neighbour) onto the streamlines'
/// reference grid first. A mask that does not overlap the reference grid simply matches nothing.
///
/// # Examples
///
/// ```no_run
/// use alic_pathways::{select, EndpointRule};
/// # fn demo(tracks: &alic_pathways::StreamlineSet, mask: &alic_pathways::AnatomicalMask) -> alic_pathways::Result<()> {
/// let hits = select(tracks, &[mask.clone()], EndpointRule::EitherEndpoint)?;
/// println!("{} of {} streamlines end in the mask.", hits.iter().filter(|h| **h).count(), hits.len());
/// # Ok(())
/// # }
/// ```
pub fn select(streamlines: &StreamlineSet, masks: &[AnatomicalMask], rule: EndpointRule) -> Result<Vec<bool>> {
    let mut hits = vec![false; streamlines.len()];
    if streamlines.is_empty() || masks.is_empty() {
        return Ok(hits);
    }

    let roi = AnatomicalMask::union(masks, &streamlines.grid)?;
    if !roi.has_support() {
        debug!("selection masks do not overlap the streamline reference grid");
        return Ok(hits);
    }

    let locator = streamlines.grid.locator()?;
    let inside = |p| locator.index(p).map(|idx| roi.contains(idx)).unwrap_or(false);

    for (hit, s) in hits.iter_mut().zip(streamlines.iter()) {
        *hit = match rule {
            EndpointRule::EitherEndpoint => s.endpoints().iter().any(|p| inside(*p)),
            EndpointRule::AnyPoint => s.points().iter().any(|p| inside(*p)),
        };
    }
    Ok(hits)
}
