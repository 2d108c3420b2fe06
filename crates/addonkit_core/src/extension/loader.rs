//! Entry point resolution and extension instantiation.
//!
//! # Responsibility
//! - Map `module.Type` entry points to factories compiled into the host.
//! - Gate instantiation on license tier and host version.
//!
//! # Invariants
//! - The loader never calls `Extension::initialize`.
//! - A factory panic is reported as `LoadError::Faulted`, never propagated.
//! - A returned handle always reports its manifest's name and version.

use crate::extension::boundary::contain;
use crate::extension::error::LoadError;
use crate::extension::manifest::{EntryPoint, ExtensionManifest, LicenseTier};
use crate::extension::protocol::Extension;
use log::{error, info};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Constructor for one extension type.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Catalog registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    InvalidEntryPoint(String),
    DuplicateEntryPoint(String),
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntryPoint(value) => {
                write!(f, "entry point must have the form `module.Type`: {value}")
            }
            Self::DuplicateEntryPoint(value) => write!(f, "entry point registered twice: {value}"),
        }
    }
}

impl Error for CatalogError {}

/// Compile-time table of extension factories keyed by entry point.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: BTreeMap<EntryPoint, ExtensionFactory>,
}

impl Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a factory for `entry_point`.
    pub fn register<F>(&mut self, entry_point: &str, factory: F) -> Result<(), CatalogError>
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        let key = EntryPoint::parse(entry_point)
            .ok_or_else(|| CatalogError::InvalidEntryPoint(entry_point.to_string()))?;
        if self.factories.contains_key(&key) {
            return Err(CatalogError::DuplicateEntryPoint(key.to_string()));
        }
        self.factories.insert(key, Arc::new(factory));
        Ok(())
    }

    pub fn resolve(&self, entry_point: &EntryPoint) -> Option<ExtensionFactory> {
        self.factories.get(entry_point).cloned()
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        EntryPoint::parse(entry_point)
            .map(|key| self.factories.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn entry_points(&self) -> Vec<String> {
        self.factories.keys().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Resolves validated manifests into uninitialized extension handles.
#[derive(Debug, Clone)]
pub struct DynamicLoader {
    catalog: ExtensionCatalog,
    host_version: semver::Version,
    license_tier: LicenseTier,
}

impl DynamicLoader {
    pub fn new(
        catalog: ExtensionCatalog,
        host_version: semver::Version,
        license_tier: LicenseTier,
    ) -> Self {
        Self {
            catalog,
            host_version,
            license_tier,
        }
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// Produces an addressable handle for `manifest`.
    ///
    /// # Errors
    /// - `LicenseRequired` when the host tier is below the manifest's tier.
    /// - `IncompatibleHost` when the host version is outside the declared range.
    /// - `UnknownEntryPoint` when the catalog has no matching factory.
    /// - `Faulted` when the factory panics.
    /// - `ProtocolMismatch` when the handle's name or version differ from the manifest.
    pub fn load(
        &self,
        manifest: &ExtensionManifest,
        path: &Path,
    ) -> Result<Box<dyn Extension>, LoadError> {
        let started_at = Instant::now();
        info!(
            "event=extension_load module=extension status=start name={} entry_point={} path={}",
            manifest.name,
            manifest.entry_point,
            path.display()
        );

        let result = self.instantiate(manifest);
        match &result {
            Ok(_) => info!(
                "event=extension_load module=extension status=ok name={} duration_ms={}",
                manifest.name,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=extension_load module=extension status=error name={} duration_ms={} error_code={} error={}",
                manifest.name,
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    fn instantiate(&self, manifest: &ExtensionManifest) -> Result<Box<dyn Extension>, LoadError> {
        self.check_license(manifest)?;
        self.check_host_version(manifest)?;

        let entry_point = manifest
            .entry_point()
            .ok_or_else(|| LoadError::UnknownEntryPoint(manifest.entry_point.clone()))?;
        let factory = self
            .catalog
            .resolve(&entry_point)
            .ok_or_else(|| LoadError::UnknownEntryPoint(entry_point.to_string()))?;

        let handle = contain(|| factory()).map_err(LoadError::Faulted)?;
        let reported = contain(|| (handle.name().to_string(), handle.version().to_string()))
            .map_err(LoadError::Faulted)?;
        if reported.0 != manifest.name || reported.1 != manifest.version {
            return Err(LoadError::ProtocolMismatch(format!(
                "handle reports {} {}, manifest declares {} {}",
                reported.0, reported.1, manifest.name, manifest.version
            )));
        }
        Ok(handle)
    }

    fn check_license(&self, manifest: &ExtensionManifest) -> Result<(), LoadError> {
        if manifest.requires_license > self.license_tier {
            return Err(LoadError::LicenseRequired {
                required: manifest.requires_license,
                available: self.license_tier,
            });
        }
        Ok(())
    }

    fn check_host_version(&self, manifest: &ExtensionManifest) -> Result<(), LoadError> {
        let bounds = [
            (manifest.min_host_version.as_deref(), true),
            (manifest.max_host_version.as_deref(), false),
        ];
        for (bound, is_min) in bounds {
            let Some(bound) = bound else {
                continue;
            };
            let version = semver::Version::parse(bound).map_err(|err| LoadError::IncompatibleHost {
                host_version: self.host_version.to_string(),
                reason: format!("unparseable host bound `{bound}`: {err}"),
            })?;
            let violated = if is_min {
                self.host_version < version
            } else {
                self.host_version > version
            };
            if violated {
                let relation = if is_min { "requires at least" } else { "supports at most" };
                return Err(LoadError::IncompatibleHost {
                    host_version: self.host_version.to_string(),
                    reason: format!("extension {relation} {version}"),
                });
            }
        }
        Ok(())
    }
}
