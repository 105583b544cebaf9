//! Distribution plotter.
//!
//! Loads two `{"counter_data": {label: count}}` files, outer-joins them on
//! label and renders a layered bar chart comparing the two sources.

pub mod chart;
pub mod counts;

pub use chart::{PlotOptions, render_comparison, render_svg};
pub use counts::{
    LabelCounts, MergedRow, RowSelection, load_counts, merge_counts, parse_counts, top_n,
    write_table,
};
