//! Custom deployment templates end to end
//!
//! Exercises the public API the way a test suite would use it: a partial
//! template on disk, completed with generated fields and stamped with
//! ownership labels, without touching a cluster.

use hetki::manifest;
use hetki::{
    ContainerWorkload, ManagedService, ServiceConfiguration, ServiceContext, WorkloadDescriptor,
};

const TEMPLATE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  labels:
    my-label: label-from-template
spec:
  template:
    spec:
      containers:
        - name: placeholder
          ports:
            - name: custom-port
              containerPort: 8080
"#;

#[test]
fn template_is_completed_not_clobbered() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let template_path = tmp.path().join("custom.yml");
    std::fs::write(&template_path, TEMPLATE).expect("write template");

    let workload = ContainerWorkload::new("quay.io/myorg/greetings:1.0")
        .port(8080)
        .expected_log("started in .*s")
        .describe();

    let template = manifest::load_template(Some(&template_path)).expect("load");
    let mut deployment = manifest::merge(template, "greetings", &workload, &[8080, 6000]);
    manifest::enrich(&mut deployment, "app-greetings");

    let container = &deployment
        .spec
        .as_ref()
        .expect("spec")
        .template
        .spec
        .as_ref()
        .expect("pod spec")
        .containers[0];

    // Identity is generated, the rest of the template survives.
    assert_eq!(container.name, "greetings");
    assert_eq!(container.image.as_deref(), Some("quay.io/myorg/greetings:1.0"));

    let ports = container.ports.as_ref().expect("ports");
    assert_eq!(ports.len(), 2);
    assert!(ports
        .iter()
        .any(|p| p.container_port == 8080 && p.name.as_deref() == Some("custom-port")));
    assert!(ports
        .iter()
        .any(|p| p.container_port == 6000 && p.name.as_deref() == Some("port-6000")));

    let labels = deployment.metadata.labels.as_ref().expect("labels");
    assert_eq!(
        labels.get("my-label"),
        Some(&"label-from-template".to_string())
    );
    assert_eq!(
        labels.get(manifest::OWNER_LABEL),
        Some(&"app-greetings".to_string())
    );
}

#[tokio::test]
async fn configured_template_flows_into_the_persisted_manifest() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let template_path = tmp.path().join("custom.yml");
    std::fs::write(&template_path, TEMPLATE).expect("write template");

    let context = ServiceContext::new("greetings", "app-greetings")
        .service_folder_at(tmp.path().join("svc"))
        .with_configuration(
            ServiceConfiguration::new()
                .template(&template_path)
                .additional_port(6000),
        );

    let workload = ContainerWorkload::new("quay.io/myorg/greetings:1.0")
        .port(8080)
        .expected_log("started in .*s");

    let mut service = ManagedService::new(context, workload);
    service.init().expect("init");

    // No client bound, so start stops right after persisting the manifest.
    let err = service.start().await.expect_err("start needs a client");
    assert!(matches!(
        err,
        hetki::ServiceError::Config(hetki::ConfigError::MissingClient)
    ));

    let persisted = tmp.path().join("svc").join(manifest::DEPLOYMENT_FILE);
    assert!(persisted.exists());

    let reloaded = manifest::load_template(Some(&persisted)).expect("reload");
    let container = &reloaded
        .spec
        .as_ref()
        .expect("spec")
        .template
        .spec
        .as_ref()
        .expect("pod spec")
        .containers[0];

    assert_eq!(container.name, "greetings");
    let ports: Vec<i32> = container
        .ports
        .as_ref()
        .expect("ports")
        .iter()
        .map(|p| p.container_port)
        .collect();
    assert_eq!(ports, vec![8080, 6000]);
}
