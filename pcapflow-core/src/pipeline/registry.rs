use std::collections::BTreeMap;

use super::{ComponentKind, InputFormat, InputModifier, OutputFormat, OutputModifier, SinkWriter, Source};
use crate::error::{PipelineError, Result};

type Ctor<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Named constructors for every pipeline component kind.
///
/// A registry is a plain value: build one, register components, hand it to
/// a [`Parser`](super::Parser).
#[derive(Default)]
pub struct Registry {
    sources: BTreeMap<String, Ctor<Box<dyn Source>>>,
    input_modifiers: BTreeMap<String, Ctor<Box<dyn InputModifier>>>,
    input_formats: BTreeMap<String, Ctor<Box<dyn InputFormat>>>,
    output_formats: BTreeMap<String, Ctor<Box<dyn OutputFormat>>>,
    output_modifiers: BTreeMap<String, Ctor<Box<dyn OutputModifier>>>,
    sinks: BTreeMap<String, Ctor<Box<dyn SinkWriter>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn register_input_modifier<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn InputModifier>> + Send + Sync + 'static,
    {
        self.input_modifiers.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn register_input_format<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn InputFormat>> + Send + Sync + 'static,
    {
        self.input_formats.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn register_output_format<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn OutputFormat>> + Send + Sync + 'static,
    {
        self.output_formats.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn register_output_modifier<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn OutputModifier>> + Send + Sync + 'static,
    {
        self.output_modifiers.insert(name.to_string(), Box::new(ctor));
        self
    }

    pub fn register_sink<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn SinkWriter>> + Send + Sync + 'static,
    {
        self.sinks.insert(name.to_string(), Box::new(ctor));
        self
    }

    /// Registered names of one kind, sorted.
    pub fn names(&self, kind: ComponentKind) -> Vec<&str> {
        fn keys<T>(map: &BTreeMap<String, T>) -> Vec<&str> {
            map.keys().map(String::as_str).collect()
        }
        match kind {
            ComponentKind::Source => keys(&self.sources),
            ComponentKind::InputModifier => keys(&self.input_modifiers),
            ComponentKind::InputFormat => keys(&self.input_formats),
            ComponentKind::OutputFormat => keys(&self.output_formats),
            ComponentKind::OutputModifier => keys(&self.output_modifiers),
            ComponentKind::Sink => keys(&self.sinks),
        }
    }

    pub fn contains(&self, kind: ComponentKind, name: &str) -> bool {
        match kind {
            ComponentKind::Source => self.sources.contains_key(name),
            ComponentKind::InputModifier => self.input_modifiers.contains_key(name),
            ComponentKind::InputFormat => self.input_formats.contains_key(name),
            ComponentKind::OutputFormat => self.output_formats.contains_key(name),
            ComponentKind::OutputModifier => self.output_modifiers.contains_key(name),
            ComponentKind::Sink => self.sinks.contains_key(name),
        }
    }

    pub fn source(&self, name: &str) -> Result<Box<dyn Source>> {
        build(&self.sources, ComponentKind::Source, name)
    }

    pub fn input_modifier(&self, name: &str) -> Result<Box<dyn InputModifier>> {
        build(&self.input_modifiers, ComponentKind::InputModifier, name)
    }

    pub fn input_format(&self, name: &str) -> Result<Box<dyn InputFormat>> {
        build(&self.input_formats, ComponentKind::InputFormat, name)
    }

    pub fn output_format(&self, name: &str) -> Result<Box<dyn OutputFormat>> {
        build(&self.output_formats, ComponentKind::OutputFormat, name)
    }

    pub fn output_modifier(&self, name: &str) -> Result<Box<dyn OutputModifier>> {
        build(&self.output_modifiers, ComponentKind::OutputModifier, name)
    }

    pub fn sink(&self, name: &str) -> Result<Box<dyn SinkWriter>> {
        build(&self.sinks, ComponentKind::Sink, name)
    }
}

fn build<T>(map: &BTreeMap<String, Ctor<T>>, kind: ComponentKind, name: &str) -> Result<T> {
    let ctor = map.get(name).ok_or_else(|| PipelineError::UnknownComponent {
        kind,
        token: name.to_string(),
    })?;
    ctor().map_err(|e| {
        PipelineError::Construct {
            kind,
            token: name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
