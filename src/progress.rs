//! Progress reporting for per-asset scans.
//!
//! The executor reports through [`Progress`]; the scanner hands each asset an
//! [`AssetProgress`] bound to that asset's key in a [`MultiProgress`].

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;

/// Progress of a single unit of work.
pub trait Progress: Send + Sync {
    fn on_progress(&self, current: usize, total: usize);
    fn errored(&self);
    fn not_applicable(&self);
    fn completed(&self);
}

/// Progress of several keyed units of work.
pub trait MultiProgress: Send + Sync {
    fn on_progress(&self, key: &str, current: usize, total: usize);
    fn errored(&self, key: &str);
    fn not_applicable(&self, key: &str);
    fn completed(&self, key: &str);
    fn close(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl Progress for NoopProgress {
    fn on_progress(&self, _current: usize, _total: usize) {}
    fn errored(&self) {}
    fn not_applicable(&self) {}
    fn completed(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMultiProgress;

impl MultiProgress for NoopMultiProgress {
    fn on_progress(&self, _key: &str, _current: usize, _total: usize) {}
    fn errored(&self, _key: &str) {}
    fn not_applicable(&self, _key: &str) {}
    fn completed(&self, _key: &str) {}
    fn close(&self) {}
}

/// Binds one key of a [`MultiProgress`].
#[derive(Clone)]
pub struct AssetProgress {
    multi: Arc<dyn MultiProgress>,
    key: String,
}

impl AssetProgress {
    pub fn new(multi: Arc<dyn MultiProgress>, key: impl Into<String>) -> Self {
        Self {
            multi,
            key: key.into(),
        }
    }
}

impl Progress for AssetProgress {
    fn on_progress(&self, current: usize, total: usize) {
        self.multi.on_progress(&self.key, current, total);
    }

    fn errored(&self) {
        self.multi.errored(&self.key);
    }

    fn not_applicable(&self) {
        self.multi.not_applicable(&self.key);
    }

    fn completed(&self) {
        self.multi.completed(&self.key);
    }
}

/// One terminal bar per asset.
pub struct ProgressBars {
    multi: indicatif::MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl ProgressBars {
    /// `elements` are `(key, label)` pairs in display order.
    pub fn new(elements: &[(String, String)]) -> Self {
        Self::with_target(elements, ProgressDrawTarget::stderr())
    }

    pub fn hidden(elements: &[(String, String)]) -> Self {
        Self::with_target(elements, ProgressDrawTarget::hidden())
    }

    fn with_target(elements: &[(String, String)], target: ProgressDrawTarget) -> Self {
        let multi = indicatif::MultiProgress::with_draw_target(target);
        let style = ProgressStyle::default_bar()
            .template("{prefix:30!} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        let bars = elements
            .iter()
            .map(|(key, label)| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style.clone());
                bar.set_prefix(label.clone());
                (key.clone(), bar)
            })
            .collect();

        Self { multi, bars }
    }

    fn bar(&self, key: &str) -> Option<&ProgressBar> {
        self.bars.get(key)
    }
}

impl MultiProgress for ProgressBars {
    fn on_progress(&self, key: &str, current: usize, total: usize) {
        if let Some(bar) = self.bar(key) {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        }
    }

    fn errored(&self, key: &str) {
        if let Some(bar) = self.bar(key) {
            bar.abandon_with_message("errored");
        }
    }

    fn not_applicable(&self, key: &str) {
        if let Some(bar) = self.bar(key) {
            bar.finish_with_message("n/a");
        }
    }

    fn completed(&self, key: &str) {
        if let Some(bar) = self.bar(key) {
            if bar.length().unwrap_or(0) == 0 {
                bar.set_length(1);
            }
            bar.set_position(bar.length().unwrap_or(1));
            bar.finish_with_message("done");
        }
    }

    fn close(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        let _ = self.multi.clear();
    }
}
