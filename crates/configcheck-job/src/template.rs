//! Validator object templates
//!
//! Builds the ServiceAccount, payload Secret, and Pod for one run. Pure data
//! assembly: the controller decides when each object is created.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector, Pod,
    PodSecurityContext, PodSpec, ResourceRequirements, Secret, SecretVolumeSource,
    ServiceAccount, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};

use crate::naming::RunNames;

/// Name of the validator container
pub const CONTAINER_NAME: &str = "config-check";

/// Pod volume backed by the payload Secret
pub const CONFIG_VOLUME: &str = "config";

/// Where the payload Secret is mounted in the validator container
pub const CONFIG_MOUNT_PATH: &str = "/etc/vector/";

/// Secret data key holding the candidate configuration
pub const CONFIG_KEY: &str = "agent.json";

/// Arguments of the validator binary
pub const VALIDATE_ARGS: [&str; 2] = ["validate", "/etc/vector/*.json"];

/// Agent settings relevant to validation, as declared on the agent resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Image of the agent itself
    pub image: String,
    /// Environment passed to the agent
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Tolerations of the agent pods
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Resource requirements of the agent pods
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    /// Overrides that apply only to the validator
    #[serde(default)]
    pub config_check: ConfigCheckSpec,
}

/// Validator-only overrides of the agent settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCheckSpec {
    /// Validator image; defaults to the agent image
    #[serde(default)]
    pub image: Option<String>,
    /// Validator tolerations; default to the agent's
    #[serde(default)]
    pub tolerations: Option<Vec<Toleration>>,
    /// Validator resources; default to the agent's
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
}

/// Resolved inputs for the validator pod
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckTemplate {
    /// Container image running the validator
    pub image: String,
    /// Extra environment appended after the built-in variables
    pub env: Vec<EnvVar>,
    /// Pod tolerations
    pub tolerations: Vec<Toleration>,
    /// Container resources
    pub resources: Option<ResourceRequirements>,
}

impl CheckTemplate {
    /// Resolve the validator settings of an agent
    ///
    /// `configCheck` values win over the agent's own; env always comes from
    /// the agent.
    pub fn from_agent(agent: &AgentSpec) -> Self {
        let overrides = &agent.config_check;
        Self {
            image: overrides
                .image
                .clone()
                .unwrap_or_else(|| agent.image.clone()),
            env: agent.env.clone(),
            tolerations: overrides
                .tolerations
                .clone()
                .unwrap_or_else(|| agent.tolerations.clone()),
            resources: overrides
                .resources
                .clone()
                .or_else(|| agent.resources.clone()),
        }
    }
}

fn metadata(names: &RunNames, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(names.namespace.clone()),
        labels: Some(names.labels()),
        ..Default::default()
    }
}

/// ServiceAccount the validator pod runs as
pub fn build_service_account(names: &RunNames) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(names, &names.service_account),
        ..Default::default()
    }
}

/// Secret carrying the candidate configuration
pub fn build_config_secret(names: &RunNames, payload: &[u8]) -> Secret {
    Secret {
        metadata: metadata(names, &names.config_secret),
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            ByteString(payload.to_vec()),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Validator pod running `validate` against the mounted configuration
pub fn build_pod(names: &RunNames, template: &CheckTemplate) -> Pod {
    let mut env = builtin_env();
    env.extend(template.env.iter().cloned());

    Pod {
        metadata: metadata(names, &names.pod),
        spec: Some(PodSpec {
            service_account_name: Some(names.service_account.clone()),
            volumes: Some(volumes(names)),
            security_context: Some(PodSecurityContext::default()),
            tolerations: (!template.tolerations.is_empty()).then(|| template.tolerations.clone()),
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                image: Some(template.image.clone()),
                args: Some(VALIDATE_ARGS.iter().map(|a| a.to_string()).collect()),
                env: Some(env),
                resources: template.resources.clone(),
                volume_mounts: Some(volume_mounts()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Host paths the agent reads at runtime, as (volume, host path, mount path)
const HOST_PATHS: [(&str, &str, &str); 5] = [
    ("data", "/var/lib/vector", "/vector-data-dir"),
    ("var-log", "/var/log/", "/var/log/"),
    ("var-lib", "/var/lib/", "/var/lib/"),
    ("procfs", "/proc", "/host/proc"),
    ("sysfs", "/sys", "/host/sys"),
];

fn volumes(names: &RunNames) -> Vec<Volume> {
    let config = Volume {
        name: CONFIG_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(names.config_secret.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };
    std::iter::once(config)
        .chain(HOST_PATHS.iter().map(|(name, path, _)| Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                type_: None,
            }),
            ..Default::default()
        }))
        .collect()
}

fn volume_mounts() -> Vec<VolumeMount> {
    std::iter::once((CONFIG_VOLUME, CONFIG_MOUNT_PATH))
        .chain(HOST_PATHS.iter().map(|(name, _, mount)| (*name, *mount)))
        .map(|(name, mount_path)| VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        })
        .collect()
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn builtin_env() -> Vec<EnvVar> {
    vec![
        field_ref_env("VECTOR_SELF_NODE_NAME", "spec.nodeName"),
        field_ref_env("VECTOR_SELF_POD_NAME", "metadata.name"),
        field_ref_env("VECTOR_SELF_POD_NAMESPACE", "metadata.namespace"),
        value_env("PROCFS_ROOT", "/host/proc"),
        value_env("SYSFS_ROOT", "/host/sys"),
    ]
}

/// Names of Secrets mounted through the payload volume of a pod
///
/// Teardown reads these back from the live pod instead of trusting the names
/// it derived itself.
pub fn payload_secret_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .into_iter()
        .flatten()
        .filter(|v| v.name == CONFIG_VOLUME)
        .filter_map(|v| v.secret.as_ref().and_then(|s| s.secret_name.clone()))
        .collect()
}
