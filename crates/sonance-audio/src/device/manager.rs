//! Mixer registry and line acquisition.

use std::fmt;
use std::sync::Arc;

use sonance_core::{EngineConfig, Error, FormatDescriptor, Result};
use tracing::{debug, info, warn};

use super::cpal::CpalMixer;
use super::virtual_mixer::VirtualMixer;
use super::{DeviceResource, LineKind};

/// Name and description of a registered mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerInfo {
    pub name: String,
    pub description: String,
}

impl MixerInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for MixerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.description)
    }
}

/// Which mixer a line should come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MixerSelection {
    /// First registered mixer that supports the requested kind.
    #[default]
    Default,
    /// The mixer with this exact name.
    Named(String),
}

impl MixerSelection {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// A source of lines.
pub trait Mixer: Send + Sync {
    fn info(&self) -> &MixerInfo;

    fn supports(&self, kind: LineKind) -> bool;

    /// Produce a closed line of `kind`.
    ///
    /// `format` is bound immediately for stream lines and may be `None` for clips,
    /// ports, and mixer lines. `buffer_size` is in bytes.
    fn line(
        &self,
        kind: LineKind,
        format: Option<FormatDescriptor>,
        buffer_size: usize,
    ) -> Result<DeviceResource>;
}

/// Registry of mixers; hands out lines by kind and selection.
pub struct DeviceManager {
    mixers: Vec<Arc<dyn Mixer>>,
    config: EngineConfig,
}

impl DeviceManager {
    /// A manager with no mixers; every `open` fails until one is registered.
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            mixers: Vec::new(),
            config,
        }
    }

    /// Only the in-process virtual mixer.
    pub fn virtual_only(config: EngineConfig) -> Self {
        let mut manager = Self::new(config);
        manager.register(Arc::new(VirtualMixer::new()));
        manager
    }

    /// cpal devices of the default host, followed by the virtual mixer.
    pub fn system(config: EngineConfig) -> Self {
        let mut manager = Self::new(config);
        match CpalMixer::discover() {
            Ok(mixers) => {
                for mixer in mixers {
                    manager.register(Arc::new(mixer));
                }
            }
            Err(e) => warn!("Audio device discovery failed: {e}"),
        }
        manager.register(Arc::new(VirtualMixer::new()));
        manager
    }

    pub fn register(&mut self, mixer: Arc<dyn Mixer>) {
        debug!("Registered mixer {}", mixer.info());
        self.mixers.push(mixer);
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mixers(&self) -> Vec<MixerInfo> {
        self.mixers.iter().map(|m| m.info().clone()).collect()
    }

    /// The first registered mixer, if any.
    pub fn default_mixer(&self) -> Option<MixerInfo> {
        self.mixers.first().map(|m| m.info().clone())
    }

    pub fn mixer(&self, name: &str) -> Option<Arc<dyn Mixer>> {
        self.mixers.iter().find(|m| m.info().name == name).cloned()
    }

    /// Acquire a closed line of `kind`.
    ///
    /// `buffer_size` defaults to the configured line buffer and is rounded down to
    /// whole frames once a format is bound.
    pub fn open(
        &self,
        kind: LineKind,
        format: Option<FormatDescriptor>,
        buffer_size: Option<usize>,
        selection: &MixerSelection,
    ) -> Result<DeviceResource> {
        let mixer = self.select(kind, selection)?;
        let buffer_size = buffer_size.unwrap_or(self.config.line_buffer_bytes);
        info!(
            "Acquiring {kind} line from {} ({buffer_size} byte buffer)",
            mixer.info().name
        );
        mixer.line(kind, format, buffer_size)
    }

    fn select(&self, kind: LineKind, selection: &MixerSelection) -> Result<Arc<dyn Mixer>> {
        match selection {
            MixerSelection::Default => self
                .mixers
                .iter()
                .find(|m| m.supports(kind))
                .cloned()
                .ok_or_else(|| Error::LineUnavailable(format!("no mixer provides a {kind} line"))),
            MixerSelection::Named(name) => {
                let mixer = self
                    .mixer(name)
                    .ok_or_else(|| Error::LineUnavailable(format!("no mixer named {name:?}")))?;
                if mixer.supports(kind) {
                    Ok(mixer)
                } else {
                    Err(Error::LineUnavailable(format!(
                        "mixer {name:?} does not provide a {kind} line"
                    )))
                }
            }
        }
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::virtual_only(EngineConfig::default())
    }
}
