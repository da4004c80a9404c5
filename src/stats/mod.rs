//! Experiment statistics chart model.
//!
//! Converts the stat route payload into what the doughnut chart needs, or
//! into the empty state when no session was recorded.

use serde::Serialize;
use tracing::debug;

use crate::error::AppResult;
use crate::session_sync::{ExperimentStats, SessionSyncClient};

/// Message shown instead of a chart when every count is zero.
pub const EMPTY_STATE_MESSAGE: &str = "No session information";

const LEGEND_CLASSES: [&str; 3] = ["primary", "success", "info"];
const BACKGROUND_COLORS: [&str; 3] = ["#4e73df", "#1cc88a", "#36b9cc"];
const HOVER_COLORS: [&str; 3] = ["#2e59d9", "#17a673", "#2c9faf"];

/// One slice of the chart, with its legend entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartSegment {
    /// Session label.
    pub label: String,
    /// Sessions under the label.
    pub count: u64,
    /// Legend bullet class.
    pub legend_class: String,
    /// Slice color.
    pub background_color: String,
    /// Slice color under the pointer.
    pub hover_color: String,
}

/// Rendering decision for the stat panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartView {
    /// No session recorded yet.
    Empty {
        /// Text shown in place of the chart.
        message: String,
    },
    /// Doughnut chart, one segment per label in server order.
    Doughnut {
        /// Chart slices.
        segments: Vec<ChartSegment>,
    },
}

impl ChartView {
    /// Build the view for a stat payload.
    pub fn from_stats(stats: &ExperimentStats) -> Self {
        let total: u64 = stats.values().map(|entry| entry.count).sum();
        if total == 0 {
            return ChartView::Empty {
                message: EMPTY_STATE_MESSAGE.to_string(),
            };
        }

        let segments = stats
            .iter()
            .enumerate()
            .map(|(index, (label, entry))| {
                let slot = index % LEGEND_CLASSES.len();
                let (background_color, hover_color) = match &entry.color {
                    Some(color) => (color.clone(), color.clone()),
                    None => (
                        BACKGROUND_COLORS[slot].to_string(),
                        HOVER_COLORS[slot].to_string(),
                    ),
                };
                ChartSegment {
                    label: label.clone(),
                    count: entry.count,
                    legend_class: LEGEND_CLASSES[slot].to_string(),
                    background_color,
                    hover_color,
                }
            })
            .collect();

        ChartView::Doughnut { segments }
    }

    /// Whether the empty state is shown.
    pub fn is_empty(&self) -> bool {
        matches!(self, ChartView::Empty { .. })
    }
}

/// Fetch the counts for `slug` and build the chart view.
pub async fn load_chart(client: &SessionSyncClient, slug: &str) -> AppResult<ChartView> {
    let stats = client.fetch_experiment_stats(slug).await?;
    let view = ChartView::from_stats(&stats);
    debug!(slug = %slug, labels = stats.len(), empty = view.is_empty(), "Chart view built");
    Ok(view)
}
