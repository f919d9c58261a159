//! Variant selection for master playlists
//!
//! Preference order, each tier ranked by bandwidth (earliest listed wins ties):
//! 1. muxed H.264
//! 2. any muxed stream
//! 3. demuxed H.264 (video only, the audio group is not fetched)
//! 4. highest bandwidth overall
//!
//! A master with no `#EXT-X-STREAM-INF` metadata at all resolves to its last listed
//! sub-playlist.

use crate::core::models::{MasterPlaylist, VariantStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    MuxedH264,
    Muxed,
    DemuxedH264,
    HighestBandwidth,
    /// No metadata anywhere, picked the last listed entry
    LastListed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VariantSelector;

impl VariantSelector {
    pub fn new() -> Self {
        Self
    }

    /// Pick the variant to resolve next; `None` only for an empty master
    pub fn select<'a>(&self, master: &'a MasterPlaylist) -> Option<&'a VariantStream> {
        self.select_with_tier(master).map(|(variant, _)| variant)
    }

    pub fn select_with_tier<'a>(
        &self,
        master: &'a MasterPlaylist,
    ) -> Option<(&'a VariantStream, SelectionTier)> {
        let variants = &master.variants;

        if !variants.iter().any(|variant| variant.described) {
            return variants
                .last()
                .map(|variant| (variant, SelectionTier::LastListed));
        }

        let tiers: [(SelectionTier, fn(&VariantStream) -> bool); 4] = [
            (SelectionTier::MuxedH264, |v| v.is_muxed() && v.has_h264()),
            (SelectionTier::Muxed, |v| v.is_muxed()),
            (SelectionTier::DemuxedH264, |v| !v.is_muxed() && v.has_h264()),
            (SelectionTier::HighestBandwidth, |_| true),
        ];

        tiers.iter().find_map(|(tier, accepts)| {
            highest_bandwidth(variants.iter().filter(|variant| accepts(variant)))
                .map(|variant| (variant, *tier))
        })
    }
}

fn highest_bandwidth<'a>(
    candidates: impl Iterator<Item = &'a VariantStream>,
) -> Option<&'a VariantStream> {
    let mut best: Option<&'a VariantStream> = None;
    for candidate in candidates {
        match best {
            Some(current) if current.bandwidth >= candidate.bandwidth => {}
            _ => best = Some(candidate),
        }
    }
    best
}
