//! Builders for the Kubernetes objects the harness assembles.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
        PersistentVolumeClaimVolumeSource, Probe, SecretVolumeSource, Volume, VolumeMount,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};
use snafu::Snafu;

use crate::validation;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("container name {container_name:?} is invalid: {reasons}"))]
    InvalidContainerName {
        container_name: String,
        reasons: String,
    },
}

/// A builder to build [`ObjectMeta`] objects.
#[derive(Clone, Default)]
pub struct ObjectMetaBuilder {
    name: Option<String>,
    namespace: Option<String>,
    labels: Option<BTreeMap<String, String>>,
    annotations: Option<BTreeMap<String, String>>,
}

impl ObjectMetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn namespace_opt(&mut self, namespace: impl Into<Option<String>>) -> &mut Self {
        self.namespace = namespace.into();
        self
    }

    /// This adds a single label to the existing labels.
    /// It'll override a label with the same key.
    pub fn with_label(
        &mut self,
        label_key: impl Into<String>,
        label_value: impl Into<String>,
    ) -> &mut Self {
        self.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(label_key.into(), label_value.into());
        self
    }

    /// This adds multiple labels to the existing labels.
    /// Any existing label with a key that is contained in `labels` will be overwritten.
    pub fn with_labels(&mut self, labels: BTreeMap<String, String>) -> &mut Self {
        self.labels.get_or_insert_with(BTreeMap::new).extend(labels);
        self
    }

    /// This adds multiple annotations to the existing annotations.
    /// Any existing annotation with a key that is contained in `annotations`
    /// will be overwritten.
    pub fn with_annotations(&mut self, annotations: BTreeMap<String, String>) -> &mut Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations);
        self
    }

    pub fn build(&self) -> ObjectMeta {
        ObjectMeta {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            ..ObjectMeta::default()
        }
    }
}

/// A builder to build [`Container`] objects.
#[derive(Clone, Default)]
pub struct ContainerBuilder {
    name: String,
    image: Option<String>,
    image_pull_policy: Option<String>,
    command: Option<Vec<String>>,
    args: Option<Vec<String>>,
    container_ports: Option<Vec<ContainerPort>>,
    env: Option<Vec<EnvVar>>,
    volume_mounts: Option<Vec<VolumeMount>>,
    readiness_probe: Option<Probe>,
}

impl ContainerBuilder {
    pub fn new(name: &str) -> Result<Self> {
        validation::is_rfc_1123_label(name).map_err(|reasons| Error::InvalidContainerName {
            container_name: name.to_string(),
            reasons: reasons.join(", "),
        })?;
        Ok(Self {
            name: name.to_string(),
            ..Self::default()
        })
    }

    pub fn image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    pub fn image_pull_policy(&mut self, image_pull_policy: impl Into<String>) -> &mut Self {
        self.image_pull_policy = Some(image_pull_policy.into());
        self
    }

    pub fn command(&mut self, command: Vec<String>) -> &mut Self {
        self.command = Some(command);
        self
    }

    pub fn args(&mut self, args: Vec<String>) -> &mut Self {
        self.args = Some(args);
        self
    }

    pub fn add_container_port(&mut self, name: impl Into<String>, port: i32) -> &mut Self {
        self.container_ports
            .get_or_insert_with(Vec::new)
            .push(ContainerPort {
                name: Some(name.into()),
                container_port: port,
                ..ContainerPort::default()
            });
        self
    }

    pub fn add_env_var(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..EnvVar::default()
        });
        self
    }

    pub fn add_volume_mount(&mut self, volume_mount: VolumeMount) -> &mut Self {
        self.volume_mounts
            .get_or_insert_with(Vec::new)
            .push(volume_mount);
        self
    }

    pub fn add_volume_mounts(
        &mut self,
        volume_mounts: impl IntoIterator<Item = VolumeMount>,
    ) -> &mut Self {
        self.volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(volume_mounts);
        self
    }

    pub fn readiness_probe(&mut self, probe: Probe) -> &mut Self {
        self.readiness_probe = Some(probe);
        self
    }

    pub fn build(&self) -> Container {
        Container {
            name: self.name.clone(),
            image: self.image.clone(),
            image_pull_policy: self.image_pull_policy.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            ports: self.container_ports.clone(),
            env: self.env.clone(),
            volume_mounts: self.volume_mounts.clone(),
            readiness_probe: self.readiness_probe.clone(),
            ..Container::default()
        }
    }
}

/// A builder to build [`Volume`] objects. May only contain one volume source
/// at a time, a later call overwrites an earlier one.
#[derive(Clone, Default)]
pub struct VolumeBuilder {
    name: String,
    volume_source: VolumeSource,
}

#[derive(Clone)]
pub enum VolumeSource {
    ConfigMap(ConfigMapVolumeSource),
    EmptyDir(EmptyDirVolumeSource),
    PersistentVolumeClaim(PersistentVolumeClaimVolumeSource),
    Secret(SecretVolumeSource),
}

impl Default for VolumeSource {
    fn default() -> Self {
        Self::EmptyDir(EmptyDirVolumeSource::default())
    }
}

impl VolumeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_config_map(&mut self, name: impl Into<String>) -> &mut Self {
        self.volume_source = VolumeSource::ConfigMap(ConfigMapVolumeSource {
            name: name.into(),
            ..ConfigMapVolumeSource::default()
        });
        self
    }

    pub fn with_empty_dir(
        &mut self,
        medium: Option<impl Into<String>>,
        size_limit: Option<Quantity>,
    ) -> &mut Self {
        self.volume_source = VolumeSource::EmptyDir(EmptyDirVolumeSource {
            medium: medium.map(Into::into),
            size_limit,
        });
        self
    }

    pub fn with_persistent_volume_claim(
        &mut self,
        claim_name: impl Into<String>,
        read_only: bool,
    ) -> &mut Self {
        self.volume_source =
            VolumeSource::PersistentVolumeClaim(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.into(),
                read_only: Some(read_only),
            });
        self
    }

    pub fn with_secret(&mut self, secret_name: impl Into<String>, optional: bool) -> &mut Self {
        self.volume_source = VolumeSource::Secret(SecretVolumeSource {
            optional: Some(optional),
            secret_name: Some(secret_name.into()),
            ..SecretVolumeSource::default()
        });
        self
    }

    /// Consumes the Builder and returns a constructed Volume
    pub fn build(&self) -> Volume {
        let name = self.name.clone();
        match &self.volume_source {
            VolumeSource::ConfigMap(cm) => Volume {
                name,
                config_map: Some(cm.clone()),
                ..Volume::default()
            },
            VolumeSource::EmptyDir(empty_dir) => Volume {
                name,
                empty_dir: Some(empty_dir.clone()),
                ..Volume::default()
            },
            VolumeSource::PersistentVolumeClaim(pvc) => Volume {
                name,
                persistent_volume_claim: Some(pvc.clone()),
                ..Volume::default()
            },
            VolumeSource::Secret(secret) => Volume {
                name,
                secret: Some(secret.clone()),
                ..Volume::default()
            },
        }
    }
}

/// A builder to build [`VolumeMount`] objects.
#[derive(Clone, Default)]
pub struct VolumeMountBuilder {
    name: String,
    mount_path: String,
    read_only: Option<bool>,
    sub_path: Option<String>,
}

impl VolumeMountBuilder {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn read_only(&mut self, read_only: bool) -> &mut Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn sub_path(&mut self, sub_path: impl Into<String>) -> &mut Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    /// Consumes the Builder and returns a constructed VolumeMount
    pub fn build(&self) -> VolumeMount {
        VolumeMount {
            mount_path: self.mount_path.clone(),
            name: self.name.clone(),
            read_only: self.read_only,
            sub_path: self.sub_path.clone(),
            ..VolumeMount::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta() {
        let meta = ObjectMetaBuilder::new()
            .name("db")
            .namespace("testpods-suite-a1b2c")
            .with_label("app", "db")
            .build();

        assert_eq!(meta.name.as_deref(), Some("db"));
        assert_eq!(meta.namespace.as_deref(), Some("testpods-suite-a1b2c"));
        assert_eq!(
            meta.labels.unwrap().get("app").map(String::as_str),
            Some("db")
        );
    }

    #[test]
    fn container() {
        let container = ContainerBuilder::new("db")
            .unwrap()
            .image("postgres:16")
            .add_env_var("POSTGRES_PASSWORD", "secret")
            .add_container_port("port-5432", 5432)
            .build();

        assert_eq!(container.name, "db");
        assert_eq!(container.image.as_deref(), Some("postgres:16"));
        assert_eq!(container.ports.unwrap()[0].container_port, 5432);
    }

    #[test]
    fn container_name_is_validated() {
        assert!(ContainerBuilder::new("Not_A_Valid_Name").is_err());
    }

    #[test]
    fn volume_sources() {
        let mut volume_builder = VolumeBuilder::new("init-scripts");
        volume_builder.with_config_map("db-init");
        let vol = volume_builder.build();

        assert_eq!(vol.name, "init-scripts");
        assert_eq!(vol.config_map.map(|cm| cm.name), Some("db-init".to_string()));

        volume_builder.with_persistent_volume_claim("db-data", false);
        let vol = volume_builder.build();
        assert_eq!(
            vol.persistent_volume_claim.map(|pvc| pvc.claim_name),
            Some("db-data".to_string())
        );
    }

    #[test]
    fn volume_mount() {
        let vm = VolumeMountBuilder::new("init-scripts", "/docker-entrypoint-initdb.d")
            .read_only(true)
            .build();

        assert_eq!(vm.name, "init-scripts");
        assert_eq!(vm.mount_path, "/docker-entrypoint-initdb.d");
        assert_eq!(vm.read_only, Some(true));
    }
}
