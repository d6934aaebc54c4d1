/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Caller-defined time series plots.
//!
//! A [`UserPlot`] compiles into the same [`PlotDescriptor`] shape as the
//! built-in plots. It reads no catalog metric: each series value comes from
//! a caller-supplied function, called once per tick in declaration order.

use std::sync::Arc;

use super::builtin::is_reserved_plot_name;
use super::layout::{PlotLayout, ScatterPlot, ScatterType, Subplot, rgb};
use super::{LayoutSpec, Payload, PlotDescriptor};

pub type ValueFn = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserPlotError {
    EmptyName,
    ReservedName(String),
    NoSeries,
}

impl std::fmt::Display for UserPlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "user plot name must not be empty"),
            Self::ReservedName(name) => write!(f, "{name:?} is a reserved plot name"),
            Self::NoSeries => write!(f, "user plot must have at least one time series"),
        }
    }
}

impl std::error::Error for UserPlotError {}

/// Rendering of one series of a user plot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    /// Hover format, e.g. `%{y:.4s}B`.
    pub unitfmt: String,
    pub stack_group: String,
    pub hover_on: String,
    pub color: Option<(u8, u8, u8)>,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unitfmt: "%{y}".to_string(),
            ..Self::default()
        }
    }

    fn subplot(&self) -> Subplot {
        Subplot {
            name: self.name.clone(),
            unitfmt: self.unitfmt.clone(),
            stackgroup: self.stack_group.clone(),
            hoveron: self.hover_on.clone(),
            color: self.color.map(|(r, g, b)| rgb(r, g, b)).unwrap_or_default(),
            kind: None,
        }
    }
}

pub struct TimeSeriesBuilder {
    plot: ScatterPlot,
    values: Vec<ValueFn>,
}

impl TimeSeriesBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            plot: ScatterPlot {
                name: name.into(),
                ..ScatterPlot::default()
            },
            values: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.plot.title = title.into();
        self
    }

    pub fn kind(mut self, kind: ScatterType) -> Self {
        self.plot.kind = kind;
        self
    }

    /// Text shown in the plot's info tooltip. May contain simple HTML.
    pub fn tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.plot.info_text = tooltip.into();
        self
    }

    pub fn y_axis_title(mut self, title: impl Into<String>) -> Self {
        self.plot.layout.yaxis.title = title.into();
        self
    }

    pub fn y_axis_tick_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.plot.layout.yaxis.ticksuffix = suffix.into();
        self
    }

    /// Adds a series whose value is read by calling `value` on every tick.
    pub fn add_series(
        mut self,
        series: TimeSeries,
        value: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.plot.subplots.push(series.subplot());
        self.values.push(Arc::new(value));
        self
    }

    pub fn build(self) -> Result<UserPlot, UserPlotError> {
        if self.plot.name.is_empty() {
            return Err(UserPlotError::EmptyName);
        }
        if is_reserved_plot_name(&self.plot.name) {
            return Err(UserPlotError::ReservedName(self.plot.name));
        }
        if self.values.is_empty() {
            return Err(UserPlotError::NoSeries);
        }
        Ok(UserPlot {
            plot: self.plot,
            values: self.values,
        })
    }
}

/// A validated user plot, ready to be handed to a server builder.
#[derive(Clone)]
pub struct UserPlot {
    plot: ScatterPlot,
    values: Vec<ValueFn>,
}

impl std::fmt::Debug for UserPlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPlot")
            .field("name", &self.plot.name)
            .field("series", &self.values.len())
            .finish()
    }
}

impl UserPlot {
    pub fn name(&self) -> &str {
        &self.plot.name
    }

    pub fn layout(&self) -> PlotLayout {
        PlotLayout::Scatter(self.plot.clone())
    }

    pub fn into_descriptor(self) -> PlotDescriptor {
        let id = self.plot.name.clone();
        let values = self.values;
        PlotDescriptor::new(
            id,
            &[],
            LayoutSpec::Static(PlotLayout::Scatter(self.plot)),
            move |_, _| Payload::Float64(values.iter().map(|value| value()).collect()),
        )
    }
}
