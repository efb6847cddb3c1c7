//! Dependency resolution for a source stamp.

use depchain_core::buildset::Buildset;
use depchain_core::ids::SourceStampId;
use depchain_core::ports::BuildsetStore;
use depchain_core::properties::{Properties, SOURCE_DEPENDENCY};
use depchain_core::{Error, Result};
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of resolving a scheduler's dependencies for one source stamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Dependencies without a successful buildset, in declaration order.
    pub unmet: Vec<String>,
    /// The subset of `unmet` that has an incomplete buildset.
    pub running: Vec<String>,
    /// Allow-listed properties copied from satisfied dependencies.
    pub propagated: Properties,
}

impl Resolution {
    pub fn is_satisfied(&self) -> bool {
        self.unmet.is_empty()
    }

    /// Unmet dependencies that have not been triggered at all.
    pub fn not_started(&self) -> impl Iterator<Item = &String> {
        self.unmet.iter().filter(|name| !self.running.contains(name))
    }
}

/// Every buildset of a source stamp paired with its property bag.
pub(crate) async fn buildsets_with_properties(
    store: &dyn BuildsetStore,
    ssid: SourceStampId,
) -> Result<Vec<(Buildset, Properties)>> {
    let buildsets = store.get_buildsets_for_source_stamp(ssid).await?;
    let properties = try_join_all(
        buildsets
            .iter()
            .map(|buildset| store.get_buildset_properties(buildset.id)),
    )
    .await?;
    Ok(buildsets.into_iter().zip(properties).collect())
}

/// Computes which dependencies of a scheduler are not yet satisfied.
pub struct DependencyResolver {
    buildsets: Arc<dyn BuildsetStore>,
    propagated_properties: Vec<String>,
}

impl DependencyResolver {
    pub fn new(buildsets: Arc<dyn BuildsetStore>, propagated_properties: Vec<String>) -> Self {
        Self {
            buildsets,
            propagated_properties,
        }
    }

    /// Resolve `dependencies` of `scheduler` for `ssid`.
    ///
    /// Fails with [`Error::DependencyFailed`] as soon as any dependency has a
    /// complete buildset whose result is neither success nor warnings.
    pub async fn resolve(
        &self,
        scheduler: &str,
        ssid: SourceStampId,
        dependencies: &[String],
    ) -> Result<Resolution> {
        let entries = buildsets_with_properties(self.buildsets.as_ref(), ssid).await?;

        let mut satisfied: HashMap<&str, &Properties> = HashMap::new();
        let mut running: HashSet<&str> = HashSet::new();

        for (buildset, properties) in &entries {
            let Some(recorded) = properties.scheduler() else {
                continue;
            };
            if !dependencies.iter().any(|d| d == recorded) {
                continue;
            }

            if !buildset.complete {
                running.insert(recorded);
            } else if buildset.is_satisfied() {
                satisfied.entry(recorded).or_insert(properties);
            } else {
                debug!(
                    scheduler,
                    ssid = %ssid,
                    dependency = recorded,
                    buildset_id = %buildset.id,
                    result = buildset.result_label(),
                    "Dependency failed"
                );
                return Err(Error::DependencyFailed {
                    scheduler: scheduler.to_string(),
                    buildset: Box::new(buildset.clone()),
                });
            }
        }

        let mut unmet: Vec<String> = Vec::new();
        for dependency in dependencies {
            if !satisfied.contains_key(dependency.as_str()) && !unmet.contains(dependency) {
                unmet.push(dependency.clone());
            }
        }
        let running = unmet
            .iter()
            .filter(|name| running.contains(name.as_str()))
            .cloned()
            .collect();

        let mut propagated = Properties::new();
        for dependency in dependencies {
            let Some(properties) = satisfied.get(dependency.as_str()) else {
                continue;
            };
            for (name, value) in properties.select(&self.propagated_properties) {
                match propagated.value(&name) {
                    None => propagated.set(name, value, SOURCE_DEPENDENCY),
                    Some(existing) if *existing != value => warn!(
                        scheduler,
                        ssid = %ssid,
                        property = %name,
                        dependency = %dependency,
                        "Conflicting dependency property ignored"
                    ),
                    Some(_) => {}
                }
            }
        }

        Ok(Resolution {
            unmet,
            running,
            propagated,
        })
    }
}
