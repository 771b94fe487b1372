//! Projects a provider credential Secret into the per-cluster Secrets the
//! provisioner and the hook jobs read.

use std::collections::BTreeMap;

use cluster_curator_crd::{util, TOWER_ACCESS_SECRET};
use serde::Deserialize;
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta},
    kube::{
        self,
        api::{Patch, PatchParams, PostParams},
        Api, ResourceExt,
    },
};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{Classify, ErrorKind};

/// Key of the credential Secret holding the YAML-encoded credential fields.
const METADATA_KEY: &str = "metadata";
const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("invalid provider credential path"))]
    InvalidCredentialPath { source: util::Error },

    #[snafu(display("failed to read credential Secret {namespace}/{name}"))]
    GetCredential {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("credential Secret {namespace}/{name} has no {METADATA_KEY:?} key"))]
    MissingMetadata { namespace: String, name: String },

    #[snafu(display("failed to parse the credential metadata of {namespace}/{name}"))]
    ParseMetadata {
        source: serde_yaml::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("the {provider} credential is missing {key:?}"))]
    MissingCredential { provider: Provider, key: &'static str },

    #[snafu(display("failed to apply Secret {namespace}/{name}"))]
    ApplySecret {
        source: kube::Error,
        namespace: String,
        name: String,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::GetCredential { source, .. } | Error::ApplySecret { source, .. } => {
                source.kind()
            }
            Error::InvalidCredentialPath { .. }
            | Error::MissingMetadata { .. }
            | Error::ParseMetadata { .. }
            | Error::MissingCredential { .. } => ErrorKind::Validation,
        }
    }
}

/// The credential kind a `applycloudprovider-*` stage projects.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
    /// Only the Tower access Secret.
    Ansible,
}

/// The fields of a provider credential, as stored in its `metadata` key.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CredentialMetadata {
    #[serde(rename = "awsAccessKeyID")]
    pub aws_access_key_id: Option<String>,
    #[serde(rename = "awsSecretAccessKeyID")]
    pub aws_secret_access_key_id: Option<String>,
    #[serde(rename = "gcProjectID")]
    pub gc_project_id: Option<String>,
    #[serde(rename = "gcServiceAccountKey")]
    pub gc_service_account_key: Option<String>,
    #[serde(rename = "osServicePrincipal")]
    pub os_service_principal: Option<String>,
    #[serde(rename = "pullSecret")]
    pub pull_secret: Option<String>,
    #[serde(rename = "sshPrivatekey")]
    pub ssh_private_key: Option<String>,
    #[serde(rename = "ansibleHost")]
    pub ansible_host: Option<String>,
    #[serde(rename = "ansibleToken")]
    pub ansible_token: Option<String>,
    #[serde(rename = "baseDomain")]
    pub base_domain: Option<String>,
}

fn required<'a>(
    provider: Provider,
    key: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .context(MissingCredentialSnafu { provider, key })
}

fn optional(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn secret(namespace: &str, name: &str, type_: Option<&str>, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        type_: type_.map(str::to_string),
        string_data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// The Secrets a credential projects into `namespace` for `cluster`.
pub fn project(
    provider: Provider,
    cluster: &str,
    namespace: &str,
    credential: &CredentialMetadata,
) -> Result<Vec<Secret>> {
    let mut secrets = Vec::new();
    let creds_name = format!("{cluster}-creds");

    match provider {
        Provider::Aws => secrets.push(secret(
            namespace,
            &creds_name,
            None,
            &[
                (
                    "aws_access_key_id",
                    required(provider, "awsAccessKeyID", &credential.aws_access_key_id)?,
                ),
                (
                    "aws_secret_access_key",
                    required(
                        provider,
                        "awsSecretAccessKeyID",
                        &credential.aws_secret_access_key_id,
                    )?,
                ),
            ],
        )),
        Provider::Gcp => secrets.push(secret(
            namespace,
            &creds_name,
            None,
            &[(
                "osServiceAccount.json",
                required(provider, "gcServiceAccountKey", &credential.gc_service_account_key)?,
            )],
        )),
        Provider::Azure => secrets.push(secret(
            namespace,
            &creds_name,
            None,
            &[(
                "osServicePrincipal.json",
                required(provider, "osServicePrincipal", &credential.os_service_principal)?,
            )],
        )),
        Provider::Ansible => {}
    }

    if provider != Provider::Ansible {
        secrets.push(secret(
            namespace,
            &format!("{cluster}-pull-secret"),
            Some(DOCKER_CONFIG_JSON_TYPE),
            &[(
                ".dockerconfigjson",
                required(provider, "pullSecret", &credential.pull_secret)?,
            )],
        ));
        secrets.push(secret(
            namespace,
            &format!("{cluster}-ssh-private-key"),
            None,
            &[(
                "ssh-privatekey",
                required(provider, "sshPrivatekey", &credential.ssh_private_key)?,
            )],
        ));
    }

    if let (Some(host), Some(token)) = (
        optional(&credential.ansible_host),
        optional(&credential.ansible_token),
    ) {
        secrets.push(secret(
            namespace,
            TOWER_ACCESS_SECRET,
            None,
            &[("host", host), ("token", token)],
        ));
    }

    Ok(secrets)
}

/// Whether `existing` lacks any of the `desired` key/value pairs.
pub fn needs_update(existing: &Secret, desired: &BTreeMap<String, String>) -> bool {
    desired.iter().any(|(key, value)| {
        let stored = existing
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| bytes.0.as_slice());
        let pending = existing
            .string_data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(String::as_bytes);
        stored.or(pending) != Some(value.as_bytes())
    })
}

pub fn parse_credential(
    credential: &Secret,
    namespace: &str,
    name: &str,
) -> Result<CredentialMetadata> {
    let raw = credential
        .data
        .as_ref()
        .and_then(|data| data.get(METADATA_KEY))
        .context(MissingMetadataSnafu { namespace, name })?;
    serde_yaml::from_slice(&raw.0).context(ParseMetadataSnafu { namespace, name })
}

/// Creates each Secret, or patches its `stringData` when the payload changed.
pub async fn apply(client: kube::Client, secrets: &[Secret]) -> Result<()> {
    for desired in secrets {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
        let existing = api.get_opt(&name).await.with_context(|_| ApplySecretSnafu {
            namespace: &namespace,
            name: &name,
        })?;
        let string_data = desired.string_data.clone().unwrap_or_default();
        match existing {
            None => {
                api.create(&PostParams::default(), desired)
                    .await
                    .with_context(|_| ApplySecretSnafu {
                        namespace: &namespace,
                        name: &name,
                    })?;
                tracing::info!(secret = %name, %namespace, "created Secret");
            }
            Some(existing) if needs_update(&existing, &string_data) => {
                let patch = json!({ "stringData": string_data });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .with_context(|_| ApplySecretSnafu {
                        namespace: &namespace,
                        name: &name,
                    })?;
                tracing::info!(secret = %name, %namespace, "updated Secret");
            }
            Some(_) => {
                tracing::debug!(secret = %name, %namespace, "Secret is up to date");
            }
        }
    }
    Ok(())
}

/// Label naming the cloud a credential Secret belongs to.
pub const CREDENTIAL_TYPE_LABEL: &str = "cluster.open-cluster-management.io/type";

/// The provider a credential is for; anything but a cloud credential only
/// carries Tower access.
pub fn provider_of(credential: &Secret) -> Provider {
    match credential
        .labels()
        .get(CREDENTIAL_TYPE_LABEL)
        .map(String::as_str)
    {
        Some("aws") => Provider::Aws,
        Some("gcp") => Provider::Gcp,
        Some("azr" | "azure") => Provider::Azure,
        _ => Provider::Ansible,
    }
}

/// Looks up which `applycloudprovider-*` stage the credential at
/// `credential_path` needs.
pub async fn resolve_provider(
    client: kube::Client,
    credential_path: Option<&str>,
) -> Result<Provider> {
    let Some(path) = credential_path.filter(|p| !p.is_empty()) else {
        return Ok(Provider::Ansible);
    };
    let (namespace, name) = util::path_split(path).context(InvalidCredentialPathSnafu)?;
    let credential = Api::<Secret>::namespaced(client, namespace)
        .get(name)
        .await
        .context(GetCredentialSnafu { namespace, name })?;
    Ok(provider_of(&credential))
}

/// Reads the credential at `credential_path` and projects it for `cluster`.
///
/// Without a credential path there is nothing to project.
pub async fn project_credentials(
    client: kube::Client,
    provider: Provider,
    credential_path: Option<&str>,
    cluster: &str,
    namespace: &str,
) -> Result<()> {
    let Some(path) = credential_path.filter(|p| !p.is_empty()) else {
        tracing::info!(%provider, cluster, "no provider credential path, skipping");
        return Ok(());
    };
    let (credential_namespace, credential_name) =
        util::path_split(path).context(InvalidCredentialPathSnafu)?;
    let credential = Api::<Secret>::namespaced(client.clone(), credential_namespace)
        .get(credential_name)
        .await
        .context(GetCredentialSnafu {
            namespace: credential_namespace,
            name: credential_name,
        })?;
    let metadata = parse_credential(&credential, credential_namespace, credential_name)?;
    let secrets = project(provider, cluster, namespace, &metadata)?;
    if secrets.is_empty() {
        tracing::info!(%provider, cluster, "credential holds nothing to project");
        return Ok(());
    }
    apply(client, &secrets).await
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use indoc::indoc;
    use stackable_operator::k8s_openapi::ByteString;

    use super::*;

    fn credential() -> CredentialMetadata {
        serde_yaml::from_str(indoc! {"
            awsAccessKeyID: AKIA
            awsSecretAccessKeyID: s3cr3t
            pullSecret: '{\"auths\":{}}'
            sshPrivatekey: key
            baseDomain: example.com
            ansibleHost: https://tower.example.com
            ansibleToken: t0ken
        "})
        .unwrap()
    }

    fn names(secrets: &[Secret]) -> Vec<String> {
        secrets.iter().map(|s| s.name_any()).collect()
    }

    #[test]
    fn aws_projection() {
        let secrets = project(Provider::Aws, "c1", "c1", &credential()).unwrap();
        assert_eq!(
            names(&secrets),
            vec!["c1-creds", "c1-pull-secret", "c1-ssh-private-key", "toweraccess"]
        );
        let creds = secrets[0].string_data.as_ref().unwrap();
        assert_eq!(creds["aws_access_key_id"], "AKIA");
        assert_eq!(creds["aws_secret_access_key"], "s3cr3t");
        assert_eq!(
            secrets[1].type_.as_deref(),
            Some("kubernetes.io/dockerconfigjson")
        );
        let tower = secrets[3].string_data.as_ref().unwrap();
        assert_eq!(tower["host"], "https://tower.example.com");
        assert_eq!(tower["token"], "t0ken");
    }

    #[test]
    fn ansible_projection_only_writes_tower_access() {
        let secrets = project(Provider::Ansible, "c1", "c1", &credential()).unwrap();
        assert_eq!(names(&secrets), vec!["toweraccess"]);

        let without_tower = CredentialMetadata {
            ansible_token: None,
            ..credential()
        };
        assert!(project(Provider::Ansible, "c1", "c1", &without_tower)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_provider_key_is_a_validation_error() {
        let error = project(Provider::Gcp, "c1", "c1", &credential()).unwrap_err();
        assert!(matches!(
            error,
            Error::MissingCredential {
                key: "gcServiceAccountKey",
                ..
            }
        ));
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn provider_from_stage_suffix() {
        assert_eq!(Provider::from_str("aws").unwrap(), Provider::Aws);
        assert_eq!(Provider::from_str("azure").unwrap(), Provider::Azure);
        assert!(Provider::from_str("vsphere").is_err());
    }

    #[test]
    fn provider_from_credential_label() {
        let labelled = |value: &str| Secret {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([(
                    CREDENTIAL_TYPE_LABEL.to_string(),
                    value.to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        };
        assert_eq!(provider_of(&labelled("aws")), Provider::Aws);
        assert_eq!(provider_of(&labelled("azr")), Provider::Azure);
        assert_eq!(provider_of(&labelled("ans")), Provider::Ansible);
        assert_eq!(provider_of(&Secret::default()), Provider::Ansible);
    }

    #[test]
    fn unchanged_payload_is_not_patched() {
        let desired = BTreeMap::from([("token".to_string(), "t0ken".to_string())]);
        let existing = Secret {
            data: Some(BTreeMap::from([(
                "token".to_string(),
                ByteString(b"t0ken".to_vec()),
            )])),
            ..Secret::default()
        };
        assert!(!needs_update(&existing, &desired));

        let changed = BTreeMap::from([("token".to_string(), "rotated".to_string())]);
        assert!(needs_update(&existing, &changed));

        let extra = BTreeMap::from([
            ("token".to_string(), "t0ken".to_string()),
            ("host".to_string(), "h".to_string()),
        ]);
        assert!(needs_update(&existing, &extra));
    }

    #[test]
    fn parses_credential_metadata() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                "metadata".to_string(),
                ByteString(b"gcProjectID: p1\ngcServiceAccountKey: '{}'\n".to_vec()),
            )])),
            ..Secret::default()
        };
        let parsed = parse_credential(&secret, "default", "gcp").unwrap();
        assert_eq!(parsed.gc_project_id.as_deref(), Some("p1"));
        assert_eq!(parsed.gc_service_account_key.as_deref(), Some("{}"));

        let error = parse_credential(&Secret::default(), "default", "gcp").unwrap_err();
        assert!(matches!(error, Error::MissingMetadata { .. }));
    }
}
