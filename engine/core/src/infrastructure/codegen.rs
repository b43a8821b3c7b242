// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Template code generator.
//!
//! Turns a discovered skill into a `builtin` plugin manifest backed by the
//! `pattern_skill` factory, so generated skills load through the same path as
//! hand-written modules.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nightframe_cortex::DiscoveredSkill;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::collaborators::{CodeGenerator, CollaboratorError, GeneratedArtifact};
use crate::domain::plugin::{PluginManifest, PluginRuntimeSpec};
use crate::infrastructure::plugins::PATTERN_SKILL_FACTORY;

pub struct TemplateCodeGenerator {
    plugin_dir: PathBuf,
}

impl TemplateCodeGenerator {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }
}

/// Lowercased skill name with anything outside `[a-z0-9_]` replaced.
fn module_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('_').to_string();
    if stem.is_empty() {
        "skill".to_string()
    } else {
        stem
    }
}

fn manifest_for(skill: &DiscoveredSkill) -> PluginManifest {
    let mut config = BTreeMap::new();
    config.insert("domain".to_string(), json!(skill.domain));
    config.insert("centroid".to_string(), json!(skill.feature_vector()));
    config.insert("capabilities".to_string(), json!([skill.domain]));
    config.insert("skill_id".to_string(), json!(skill.id.to_string()));
    config.insert("utility_score".to_string(), json!(skill.utility_score));

    PluginManifest {
        name: skill.name.clone(),
        version: "1.0.0".to_string(),
        description: Some(skill.description.clone()),
        runtime: PluginRuntimeSpec::Builtin {
            factory: PATTERN_SKILL_FACTORY.to_string(),
        },
        config,
    }
}

#[async_trait]
impl CodeGenerator for TemplateCodeGenerator {
    async fn generate(&self, skill: &DiscoveredSkill) -> Result<GeneratedArtifact, CollaboratorError> {
        let content = manifest_for(skill)
            .to_yaml_string()
            .map_err(|e| CollaboratorError::Generation(e.to_string()))?;
        let file_name = format!("{}.yaml", module_stem(&skill.name));
        debug!(skill = %skill.name, file_name = %file_name, "Generated plugin manifest");

        Ok(GeneratedArtifact {
            skill_id: skill.id,
            skill_name: skill.name.clone(),
            file_name,
            content,
        })
    }

    async fn validate(&self, artifact: &GeneratedArtifact) -> Result<Vec<String>, CollaboratorError> {
        let manifest = match PluginManifest::from_yaml_str(&artifact.content) {
            Ok(manifest) => manifest,
            Err(e) => return Ok(vec![format!("manifest does not parse: {}", e)]),
        };

        let mut problems = Vec::new();
        match &manifest.runtime {
            PluginRuntimeSpec::Builtin { factory } if factory == PATTERN_SKILL_FACTORY => {}
            other => problems.push(format!("unexpected runtime {:?}", other)),
        }

        if !manifest.config.get("domain").is_some_and(Value::is_string) {
            problems.push("config.domain must be a string".to_string());
        }

        let centroid: Option<Vec<f64>> = manifest
            .config
            .get("centroid")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect());
        match centroid {
            Some(c) if !c.is_empty() && c.iter().all(|v| v.is_finite()) => {}
            _ => problems.push("config.centroid must be a non-empty list of finite numbers".to_string()),
        }

        if !artifact.file_name.ends_with(".yaml") || artifact.file_name.contains('/') {
            problems.push(format!("invalid module file name '{}'", artifact.file_name));
        }
        Ok(problems)
    }

    async fn deploy(&self, artifact: &GeneratedArtifact) -> Result<PathBuf, CollaboratorError> {
        tokio::fs::create_dir_all(&self.plugin_dir)
            .await
            .map_err(|e| CollaboratorError::Deployment(format!("{}: {}", self.plugin_dir.display(), e)))?;

        let target = self.plugin_dir.join(&artifact.file_name);
        // Hidden temp name so discovery never sees a partial file
        let staging = self.plugin_dir.join(format!(".{}.tmp", artifact.file_name));
        tokio::fs::write(&staging, artifact.content.as_bytes()).await?;
        tokio::fs::rename(&staging, &target).await?;

        info!(skill = %artifact.skill_name, path = %target.display(), "Deployed generated skill");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightframe_cortex::DiscoveryMethod;

    fn skill() -> DiscoveredSkill {
        DiscoveredSkill::new(
            "Auto_5g_nr_3",
            "Automatically discovered skill for 5g_nr",
            "5g_nr",
            DiscoveryMethod::PatternClustering,
        )
        .with_features(&[0.25, -1.5, 0.75])
    }

    #[test]
    fn test_module_stem() {
        assert_eq!(module_stem("Auto_5g_nr_3"), "auto_5g_nr_3");
        assert_eq!(module_stem("Wi-Fi AP!"), "wi_fi_ap");
        assert_eq!(module_stem("---"), "skill");
    }

    #[tokio::test]
    async fn test_generate_validate_deploy() {
        let dir = tempfile::tempdir().unwrap();
        let generator = TemplateCodeGenerator::new(dir.path().join("plugins"));

        let artifact = generator.generate(&skill()).await.unwrap();
        assert_eq!(artifact.file_name, "auto_5g_nr_3.yaml");
        assert!(generator.validate(&artifact).await.unwrap().is_empty());

        let path = generator.deploy(&artifact).await.unwrap();
        let manifest = PluginManifest::from_yaml_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(manifest.name, "Auto_5g_nr_3");
        assert_eq!(manifest.config["centroid"], json!([0.25, -1.5, 0.75]));
        assert_eq!(std::fs::read_dir(dir.path().join("plugins")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_validate_rejects_empty_centroid() {
        let generator = TemplateCodeGenerator::new("/unused");
        let bare = DiscoveredSkill::new("Auto_wifi_ap", "", "wifi_ap", DiscoveryMethod::CapabilityThreshold);
        let artifact = generator.generate(&bare).await.unwrap();
        let problems = generator.validate(&artifact).await.unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("centroid"));
    }
}
