// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Built-in skill that recognizes one discovered pattern.
//!
//! Configured from the plugin context:
//!
//! ```yaml
//! config:
//!   domain: 5g_nr
//!   centroid: [0.12, -1.4, 0.8]
//!   radius: 1.0            # optional
//!   capabilities: [5g_nr]  # optional, defaults to [domain]
//! ```
//!
//! `predict` takes `{"features": [...]}` and reports the distance to the
//! centroid. `execute` describes the pattern.

use serde_json::{json, Value};

use crate::domain::plugin::{EntryPoint, PluginContext, PluginError, PluginId, SkillPlugin};

const DEFAULT_RADIUS: f64 = 1.0;

#[derive(Debug, Default)]
pub struct PatternSkillPlugin {
    plugin_id: Option<PluginId>,
    domain: String,
    centroid: Vec<f64>,
    radius: f64,
    capabilities: Vec<String>,
}

impl PatternSkillPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&self) -> PluginId {
        self.plugin_id.clone().unwrap_or_else(|| PluginId::new("pattern_skill"))
    }

    fn init_error(&self, context: &PluginContext, message: impl Into<String>) -> PluginError {
        PluginError::Initialization {
            plugin_id: context.plugin_id.clone(),
            message: message.into(),
        }
    }

    fn predict(&self, input: &Value) -> Result<Value, PluginError> {
        let features: Vec<f64> = input
            .get("features")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .ok_or_else(|| PluginError::Execution {
                plugin_id: self.id(),
                message: "input must contain a numeric 'features' array".to_string(),
            })?;

        if features.len() != self.centroid.len() {
            return Err(PluginError::Execution {
                plugin_id: self.id(),
                message: format!(
                    "expected {} features, got {}",
                    self.centroid.len(),
                    features.len()
                ),
            });
        }

        let distance = features
            .iter()
            .zip(&self.centroid)
            .map(|(x, c)| (x - c).powi(2))
            .sum::<f64>()
            .sqrt();

        Ok(json!({
            "domain": self.domain,
            "distance": distance,
            "similarity": 1.0 / (1.0 + distance),
            "match": distance <= self.radius,
        }))
    }
}

impl SkillPlugin for PatternSkillPlugin {
    fn initialize(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        let domain = context
            .config
            .get("domain")
            .and_then(Value::as_str)
            .ok_or_else(|| self.init_error(context, "config.domain is required"))?
            .to_string();

        let centroid = context
            .config
            .get("centroid")
            .and_then(Value::as_array)
            .ok_or_else(|| self.init_error(context, "config.centroid is required"))?;
        let centroid: Vec<f64> = centroid.iter().filter_map(Value::as_f64).collect();
        if centroid.is_empty() || !centroid.iter().all(|v| v.is_finite()) {
            return Err(self.init_error(context, "config.centroid must be a non-empty list of numbers"));
        }

        let radius = context
            .config
            .get("radius")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_RADIUS);

        let capabilities = context
            .config
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|caps| caps.iter().filter_map(|c| c.as_str().map(String::from)).collect())
            .unwrap_or_else(|| vec![domain.clone()]);

        self.plugin_id = Some(context.plugin_id.clone());
        self.domain = domain;
        self.centroid = centroid;
        self.radius = radius;
        self.capabilities = capabilities;
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::Predict, EntryPoint::Execute]
    }

    fn invoke(&mut self, entry_point: EntryPoint, input: Value) -> Result<Value, PluginError> {
        match entry_point {
            EntryPoint::Predict => self.predict(&input),
            EntryPoint::Execute => Ok(json!({
                "domain": self.domain,
                "centroid": self.centroid,
                "radius": self.radius,
            })),
            EntryPoint::AnalyzeState => Err(PluginError::Execution {
                plugin_id: self.id(),
                message: "analyze_state is not supported".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn context(config: Value) -> PluginContext {
        let config: BTreeMap<String, Value> = serde_json::from_value(config).unwrap();
        PluginContext {
            plugin_id: PluginId::new("auto_5g_nr_0"),
            plugin_dir: PathBuf::from("/plugins"),
            config,
        }
    }

    #[test]
    fn test_predict_distance() {
        let mut plugin = PatternSkillPlugin::new();
        plugin
            .initialize(&context(json!({"domain": "5g_nr", "centroid": [0.0, 0.0]})))
            .unwrap();
        assert_eq!(plugin.capabilities(), vec!["5g_nr".to_string()]);

        let out = plugin
            .invoke(EntryPoint::Predict, json!({"features": [3.0, 4.0]}))
            .unwrap();
        assert_eq!(out["distance"], json!(5.0));
        assert_eq!(out["match"], json!(false));

        assert!(plugin
            .invoke(EntryPoint::Predict, json!({"features": [1.0]}))
            .is_err());
    }

    #[test]
    fn test_initialize_requires_centroid() {
        let mut plugin = PatternSkillPlugin::new();
        let err = plugin
            .initialize(&context(json!({"domain": "wifi_ap", "centroid": []})))
            .unwrap_err();
        assert!(matches!(err, PluginError::Initialization { .. }));
    }
}
