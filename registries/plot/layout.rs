/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Serializable plot layouts sent to clients in the initial config message.
//!
//! There are exactly two rendering shapes, so [`PlotLayout`] is a closed sum
//! type rather than a trait hierarchy.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlotLayout {
    Scatter(ScatterPlot),
    Heatmap(HeatmapPlot),
}

impl PlotLayout {
    pub fn name(&self) -> &str {
        match self {
            PlotLayout::Scatter(plot) => &plot.name,
            PlotLayout::Heatmap(plot) => &plot.name,
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        match self {
            PlotLayout::Scatter(plot) => plot.name = name.to_string(),
            PlotLayout::Heatmap(plot) => plot.name = name.to_string(),
        }
    }

    /// Event series drawn as vertical markers on this plot, if any.
    pub fn horz_events(&self) -> &str {
        match self {
            PlotLayout::Scatter(plot) => &plot.horz_events,
            PlotLayout::Heatmap(plot) => &plot.horz_events,
        }
    }

    pub(crate) fn clear_horz_events(&mut self) {
        match self {
            PlotLayout::Scatter(plot) => plot.horz_events.clear(),
            PlotLayout::Heatmap(plot) => plot.horz_events.clear(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScatterType {
    #[default]
    Scatter,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScatterPlot {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ScatterType,
    pub update_freq: u32,
    pub horz_events: String,
    pub layout: ScatterAxes,
    pub subplots: Vec<Subplot>,
    pub info_text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScatterAxes {
    pub yaxis: ScatterYAxis,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub barmode: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScatterYAxis {
    pub title: String,
    pub ticksuffix: String,
}

/// One series of a scatter plot.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Subplot {
    pub name: String,
    pub unitfmt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stackgroup: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hoveron: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
    /// Per-series override of the plot type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ScatterType>,
}

impl Subplot {
    pub fn new(name: &str, unitfmt: &str) -> Self {
        Self {
            name: name.to_string(),
            unitfmt: unitfmt.to_string(),
            ..Self::default()
        }
    }

    pub fn colored(mut self, color: String) -> Self {
        self.color = color;
        self
    }

    pub fn stacked(mut self, group: &str) -> Self {
        self.stackgroup = group.to_string();
        self.hoveron = "points+fills".to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapPlot {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub update_freq: u32,
    pub horz_events: String,
    pub layout: HeatmapAxes,
    pub colorscale: Vec<WeightedColor>,
    /// Row positions, `0..n`.
    pub buckets: Vec<f64>,
    /// Real (downsampled) bucket upper bounds, used for hover labels.
    #[serde(rename = "custom_data")]
    pub custom_data: Vec<f64>,
    pub hover: HeatmapHover,
    pub info_text: String,
}

impl Default for HeatmapPlot {
    fn default() -> Self {
        Self {
            name: String::new(),
            title: String::new(),
            kind: "heatmap",
            update_freq: 0,
            horz_events: String::new(),
            layout: HeatmapAxes::default(),
            colorscale: Vec::new(),
            buckets: Vec::new(),
            custom_data: Vec::new(),
            hover: HeatmapHover::default(),
            info_text: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HeatmapAxes {
    pub yaxis: HeatmapYAxis,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HeatmapYAxis {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tickmode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tickvals: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ticktext: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HeatmapHover {
    pub yname: String,
    /// `duration`, `bytes` or a custom unit.
    pub yunit: String,
    pub zname: String,
}

/// A colorscale stop, serialized as `[weight, "rgb(r,g,b)"]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedColor(pub f64, pub String);

pub fn rgb(r: u8, g: u8, b: u8) -> String {
    format!("rgb({r},{g},{b})")
}

fn shades(stops: [(u8, u8, u8); 5]) -> Vec<WeightedColor> {
    stops
        .iter()
        .enumerate()
        .map(|(i, (r, g, b))| WeightedColor(i as f64 / 4.0, rgb(*r, *g, *b)))
        .collect()
}

pub fn blue_shades() -> Vec<WeightedColor> {
    shades([
        (247, 251, 255),
        (198, 219, 239),
        (107, 174, 214),
        (33, 113, 181),
        (8, 48, 107),
    ])
}

pub fn green_shades() -> Vec<WeightedColor> {
    shades([
        (247, 252, 245),
        (199, 233, 192),
        (116, 196, 118),
        (35, 139, 69),
        (0, 68, 27),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scatter_serializes_with_client_field_names() {
        let layout = PlotLayout::Scatter(ScatterPlot {
            name: "cpu".into(),
            title: "CPU".into(),
            kind: ScatterType::Bar,
            horz_events: "lastmark".into(),
            subplots: vec![Subplot {
                kind: Some(ScatterType::Bar),
                ..Subplot::new("usage", "%{y:.2f}%")
            }],
            ..ScatterPlot::default()
        });

        let value = serde_json::to_value(&layout).expect("layout should serialize");
        assert_eq!(value["type"], "bar");
        assert_eq!(value["horzEvents"], "lastmark");
        assert_eq!(value["updateFreq"], 0);
        assert_eq!(value["layout"]["yaxis"]["ticksuffix"], "");
        assert!(value["layout"].get("barmode").is_none());
        assert_eq!(
            value["subplots"][0],
            json!({"name": "usage", "unitfmt": "%{y:.2f}%", "type": "bar"})
        );
    }

    #[test]
    fn heatmap_serializes_colorscale_as_pairs() {
        let layout = PlotLayout::Heatmap(HeatmapPlot {
            name: "h".into(),
            colorscale: vec![WeightedColor(0.0, rgb(1, 2, 3))],
            custom_data: vec![1.0, 2.0],
            ..HeatmapPlot::default()
        });

        let value = serde_json::to_value(&layout).expect("layout should serialize");
        assert_eq!(value["type"], "heatmap");
        assert_eq!(value["colorscale"], json!([[0.0, "rgb(1,2,3)"]]));
        assert_eq!(value["custom_data"], json!([1.0, 2.0]));
    }

    #[test]
    fn shades_span_unit_interval() {
        let scale = green_shades();
        assert_eq!(scale.first().map(|c| c.0), Some(0.0));
        assert_eq!(scale.last().map(|c| c.0), Some(1.0));
    }
}
