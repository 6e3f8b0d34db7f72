/*!
 * Config Loader
 * serde_yaml loaders for the declarative config files
 *
 * Each loader feeds its registry through the registry's own builder and
 * validation; malformed entries are dropped with a warning instead of
 * failing the boot. Keys and file order carry no meaning.
 *
 * `ResourcesConfig.yaml`:
 * ```yaml
 * ResourceConfigs:
 *   - ResType: 1
 *     ResID: 2
 *     Name: cpu_max_freq
 *     Path: /sys/devices/system/cpu/cpu%d/cpufreq/scaling_max_freq
 *     Supported: true
 *     HighThreshold: 3200000
 *     LowThreshold: 300000
 *     Permissions: third_party
 *     Policy: higher_is_better
 *     ApplyType: core
 *     Unit: khz
 * ```
 *
 * `TargetConfig.yaml`:
 * ```yaml
 * TargetConfig:
 *   TargetName: sm_ref_8
 *   ClusterInfo:
 *     - LgcId: 0
 *       PhyId: 0
 *       NumCores: 4
 * ```
 *
 * `InitConfig.yaml`:
 * ```yaml
 * InitConfigs:
 *   CgroupsInfo:
 *     - Name: background
 *       ID: 1
 * ```
 *
 * `SignalsConfig.yaml`:
 * ```yaml
 * SignalConfigs:
 *   - SigId: 16
 *     SigType: 0
 *     Category: 1
 *     Name: EARLY_WAKEUP
 *     Timeout: 4000
 *     Permissions: [system, third_party]
 *     Resources:
 *       - ResCode: 65538
 *         Scopes: [1, 4]
 *         Values: [1344100, 1590871]
 * ```
 *
 * `PropertiesConfig.yaml`:
 * ```yaml
 * PropertiesConfigs:
 *   - Name: maximum.concurrent.requests
 *     Value: 128
 * ```
 *
 * `PerAppConfig.yaml`:
 * ```yaml
 * AppConfigs:
 *   - Name: com.example.game
 *     Signals:
 *       - SigId: 16
 *         SigType: 0
 * ```
 */

use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::core::errors::{Result, TuneError};
use crate::core::types::{modes, pack_res_code, ApplyScope, Permission, Policy, Unit};
use crate::registry::app::{AppBinding, AppRegistry};
use crate::registry::properties::PropertiesRegistry;
use crate::registry::resource::{ResourceDescriptor, ResourceRegistry};
use crate::registry::signal::{SignalDescriptorBuilder, SignalRegistry};
use crate::registry::target::{CgroupInfo, ClusterInfo, TargetRegistry};

pub const RESOURCES_CONFIG: &str = "ResourcesConfig.yaml";
pub const TARGET_CONFIG: &str = "TargetConfig.yaml";
pub const INIT_CONFIG: &str = "InitConfig.yaml";
pub const PROPERTIES_CONFIG: &str = "PropertiesConfig.yaml";
pub const SIGNALS_CONFIG: &str = "SignalsConfig.yaml";
pub const PER_APP_CONFIG: &str = "PerAppConfig.yaml";

/// Everything the config directory produced
pub struct LoadedConfig {
    pub targets: Arc<TargetRegistry>,
    pub resources: ResourceRegistry,
    pub signals: SignalRegistry,
    pub apps: AppRegistry,
    pub properties: PropertiesRegistry,
}

// ---- raw file shapes -------------------------------------------------------

#[derive(Deserialize)]
struct TargetConfigFile {
    #[serde(rename = "TargetConfig")]
    target: TargetRaw,
}

#[derive(Deserialize)]
struct TargetRaw {
    #[serde(rename = "TargetName")]
    name: String,
    #[serde(rename = "ClusterInfo", default)]
    clusters: Vec<ClusterRaw>,
}

#[derive(Deserialize)]
struct ClusterRaw {
    #[serde(rename = "LgcId")]
    logical_id: u32,
    #[serde(rename = "PhyId")]
    physical_id: u32,
    #[serde(rename = "NumCores")]
    num_cores: u32,
}

#[derive(Deserialize)]
struct InitConfigFile {
    #[serde(rename = "InitConfigs")]
    init: InitRaw,
}

#[derive(Deserialize)]
struct InitRaw {
    #[serde(rename = "CgroupsInfo", default)]
    cgroups: Vec<CgroupRaw>,
}

#[derive(Deserialize)]
struct CgroupRaw {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ID")]
    id: u32,
}

#[derive(Deserialize)]
struct ResourcesConfigFile {
    #[serde(rename = "ResourceConfigs")]
    resources: Vec<ResourceRaw>,
}

#[derive(Deserialize)]
struct ResourceRaw {
    #[serde(rename = "ResType")]
    res_type: u8,
    #[serde(rename = "ResID")]
    res_id: u16,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Path", default)]
    path: String,
    #[serde(rename = "Supported", default = "default_true")]
    supported: bool,
    #[serde(rename = "HighThreshold", default = "default_high")]
    high: i32,
    #[serde(rename = "LowThreshold", default = "default_low")]
    low: i32,
    #[serde(rename = "Permissions", default)]
    permissions: Option<String>,
    #[serde(rename = "Modes", default)]
    modes: Option<Vec<String>>,
    #[serde(rename = "Policy", default)]
    policy: Option<String>,
    #[serde(rename = "ApplyType", default)]
    apply_type: Option<String>,
    #[serde(rename = "Unit", default)]
    unit: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_high() -> i32 {
    i32::MAX
}

fn default_low() -> i32 {
    i32::MIN
}

#[derive(Deserialize)]
struct SignalsConfigFile {
    #[serde(rename = "SignalConfigs")]
    signals: Vec<SignalRaw>,
}

#[derive(Deserialize)]
struct SignalRaw {
    #[serde(rename = "SigId")]
    sig_id: u16,
    #[serde(rename = "SigType", default)]
    sig_type: u32,
    #[serde(rename = "Category", default)]
    category: u8,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Timeout")]
    timeout_ms: i64,
    #[serde(rename = "Permissions", default)]
    permissions: Vec<String>,
    #[serde(rename = "Resources", default)]
    resources: Vec<SignalResourceRaw>,
}

#[derive(Deserialize)]
struct SignalResourceRaw {
    #[serde(rename = "ResCode")]
    res_code: u32,
    #[serde(rename = "Scopes", default)]
    scopes: Vec<i32>,
    #[serde(rename = "Values")]
    values: Vec<i32>,
}

#[derive(Deserialize)]
struct PropertiesConfigFile {
    #[serde(rename = "PropertiesConfigs")]
    properties: Vec<PropertyRaw>,
}

#[derive(Deserialize)]
struct PropertyRaw {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: serde_yaml::Value,
}

#[derive(Deserialize)]
struct PerAppConfigFile {
    #[serde(rename = "AppConfigs")]
    apps: Vec<AppRaw>,
}

#[derive(Deserialize)]
struct AppRaw {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Signals", default)]
    signals: Vec<AppSignalRaw>,
}

#[derive(Deserialize)]
struct AppSignalRaw {
    #[serde(rename = "SigId")]
    sig_id: u16,
    #[serde(rename = "SigType", default)]
    sig_type: u32,
}

// ---- loaders ---------------------------------------------------------------

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} not found, using defaults", path.display());
            return Ok(None);
        }
        Err(e) => return Err(TuneError::IoFailed(format!("{}: {}", path.display(), e))),
    };
    serde_yaml::from_str(&raw)
        .map(Some)
        .map_err(|e| TuneError::ArgInvalid(format!("{}: {}", path.display(), e)))
}

fn parse_modes(raw: &Option<Vec<String>>) -> u8 {
    let Some(names) = raw else {
        return modes::ALL;
    };
    let mut mask = 0u8;
    for name in names {
        match name.as_str() {
            "display_on" => mask |= modes::DISPLAY_ON,
            "doze" => mask |= modes::DOZE,
            "display_off" => mask |= modes::DISPLAY_OFF,
            other => warn!("unknown mode '{}' ignored", other),
        }
    }
    if mask == 0 {
        modes::ALL
    } else {
        mask
    }
}

/// Parse one enum-valued config string (e.g. "higher_is_better"); `None`
/// on an unrecognized value so the caller can drop just that entry
fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    serde_yaml::from_str(raw).ok()
}

fn stringify(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Cluster topology and cgroups, combined from the target and init files
pub fn load_targets(dir: &Path) -> Result<Arc<TargetRegistry>> {
    let target = read_yaml::<TargetConfigFile>(&dir.join(TARGET_CONFIG))?;
    let init = read_yaml::<InitConfigFile>(&dir.join(INIT_CONFIG))?;

    let (name, clusters) = match target {
        Some(file) => (
            file.target.name,
            file.target
                .clusters
                .into_iter()
                .map(|c| ClusterInfo {
                    logical_id: c.logical_id,
                    physical_id: c.physical_id,
                    core_count: c.num_cores,
                })
                .collect(),
        ),
        None => ("unknown".to_string(), Vec::new()),
    };
    let cgroups = init
        .map(|file| {
            file.init
                .cgroups
                .into_iter()
                .map(|c| CgroupInfo {
                    name: c.name,
                    id: c.id,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Arc::new(TargetRegistry::new(name, clusters, cgroups)))
}

pub fn load_resources(dir: &Path, targets: Arc<TargetRegistry>) -> Result<ResourceRegistry> {
    let mut registry = ResourceRegistry::new(targets);
    let Some(file) = read_yaml::<ResourcesConfigFile>(&dir.join(RESOURCES_CONFIG))? else {
        return Ok(registry);
    };

    let mut accepted = 0usize;
    for raw in file.resources {
        if !raw.supported {
            continue;
        }
        // Enum-valued fields are parsed per entry: an unrecognized policy
        // or scope drops this descriptor, never the whole file.
        let (permission, policy, scope, unit) = match (
            raw.permissions
                .as_deref()
                .map_or(Some(Permission::ThirdParty), parse_enum),
            raw.policy.as_deref().map_or(Some(Policy::Instant), parse_enum),
            raw.apply_type
                .as_deref()
                .map_or(Some(ApplyScope::Global), parse_enum),
            raw.unit.as_deref().map_or(Some(Unit::None), parse_enum),
        ) {
            (Some(permission), Some(policy), Some(scope), Some(unit)) => {
                (permission, policy, scope, unit)
            }
            _ => {
                warn!("resource '{}' has an unrecognized enum field, dropped", raw.name);
                continue;
            }
        };
        let desc = ResourceDescriptor::builder(pack_res_code(raw.res_type, raw.res_id), raw.name)
            .path(raw.path)
            .bounds(raw.low, raw.high)
            .permission(permission)
            .modes(parse_modes(&raw.modes))
            .scope(scope)
            .policy(policy)
            .unit(unit)
            .build();
        match registry.register(desc) {
            Ok(()) => accepted += 1,
            Err(e) => warn!("resource dropped: {}", e),
        }
    }
    info!("resource config: {} descriptor(s) accepted", accepted);
    Ok(registry)
}

pub fn load_signals(dir: &Path) -> Result<SignalRegistry> {
    let mut registry = SignalRegistry::new();
    let Some(file) = read_yaml::<SignalsConfigFile>(&dir.join(SIGNALS_CONFIG))? else {
        return Ok(registry);
    };

    'signals: for raw in file.signals {
        let mut builder = SignalDescriptorBuilder::new(raw.sig_id, raw.sig_type, raw.name.clone())
            .category(raw.category)
            .default_timeout_ms(raw.timeout_ms);
        for permission in &raw.permissions {
            match parse_enum::<Permission>(permission) {
                Some(permission) => builder = builder.permit(permission),
                None => {
                    warn!(
                        "signal '{}' has unrecognized permission '{}', dropped",
                        raw.name, permission
                    );
                    continue 'signals;
                }
            }
        }
        for resource in raw.resources {
            builder = builder.bundle(resource.res_code, resource.scopes, resource.values);
        }
        if let Err(e) = registry.register(builder.build()) {
            warn!("signal dropped: {}", e);
        }
    }
    info!("signal config: {} signal(s) accepted", registry.len());
    Ok(registry)
}

pub fn load_properties(dir: &Path) -> Result<PropertiesRegistry> {
    let registry = PropertiesRegistry::new();
    let Some(file) = read_yaml::<PropertiesConfigFile>(&dir.join(PROPERTIES_CONFIG))? else {
        return Ok(registry);
    };
    for raw in file.properties {
        match stringify(&raw.value) {
            Some(value) => registry.set(raw.name, value),
            None => warn!("property '{}' has a non-scalar value, dropped", raw.name),
        }
    }
    info!("property config: {} propert(ies) loaded", registry.len());
    Ok(registry)
}

pub fn load_apps(dir: &Path) -> Result<AppRegistry> {
    let mut registry = AppRegistry::new();
    let Some(file) = read_yaml::<PerAppConfigFile>(&dir.join(PER_APP_CONFIG))? else {
        return Ok(registry);
    };
    for raw in file.apps {
        registry.register(AppBinding {
            app_name: raw.name,
            signals: raw.signals.into_iter().map(|s| (s.sig_id, s.sig_type)).collect(),
        });
    }
    Ok(registry)
}

/// Load every config file from one directory
pub fn load_dir(dir: impl AsRef<Path>) -> Result<LoadedConfig> {
    let dir = dir.as_ref();
    let targets = load_targets(dir)?;
    Ok(LoadedConfig {
        resources: load_resources(dir, Arc::clone(&targets))?,
        signals: load_signals(dir)?,
        apps: load_apps(dir)?,
        properties: load_properties(dir)?,
        targets,
    })
}
