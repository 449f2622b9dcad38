//! Unit tests for Kubernetes resource builders.
//!
//! Run with: `cargo test resources_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::EnvVar;

    use crate::controller::capabilities::CapabilityFacts;
    use crate::controller::resources::{
        build_config_map, build_console_link, build_deployment, build_ingress, build_route,
        build_service_account, desired_resources, ObservedState, SynthesisInput,
        CONFIG_VERSION_ANNOTATION, TEMPLATE_VERSION_ANNOTATION,
    };
    use crate::controller::{ManagedResource, ResourceKind};
    use crate::crd::{
        BrandingConfig, DeploymentMode, LocalSecretReference, MetadataPropagation, RbacConfig,
        RouteConfig, WebConsole, WebConsoleSpec,
    };
    use crate::settings::OperatorSettings;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn kubernetes() -> CapabilityFacts {
        CapabilityFacts {
            platform_version: "1.30".to_string(),
            base_version: "1.30".to_string(),
            ..Default::default()
        }
    }

    fn openshift() -> CapabilityFacts {
        CapabilityFacts {
            platform_version: "4.14.3".to_string(),
            base_version: "1.27".to_string(),
            is_extended_platform: true,
            is_extended_platform_minimum_version: true,
            supports_routes: true,
            supports_image_streams: true,
            supports_platform_links: true,
            platform_console_url: Some("https://console.apps.example.com".to_string()),
        }
    }

    fn resolved_spec(mode: DeploymentMode) -> WebConsoleSpec {
        let mut spec = WebConsoleSpec {
            deployment_mode: Some(mode),
            replicas: Some(1),
            ..Default::default()
        };
        spec.auth.internal_ssl = Some(true);
        spec.auth.client_cert_expiration_period = Some(24);
        spec
    }

    fn console(spec: WebConsoleSpec) -> WebConsole {
        let mut console = WebConsole::new("console", spec);
        console.metadata.namespace = Some("tools".to_string());
        console.metadata.uid = Some("uid-console".to_string());
        console
    }

    fn synthesize(
        console: &WebConsole,
        facts: &CapabilityFacts,
        observed: &ObservedState,
    ) -> Vec<ManagedResource> {
        let settings = OperatorSettings::default();
        let input = SynthesisInput {
            console,
            facts,
            settings: &settings,
            observed,
        };
        desired_resources(&input).unwrap()
    }

    fn kinds(resources: &[ManagedResource]) -> Vec<ResourceKind> {
        resources.iter().map(ManagedResource::kind).collect()
    }

    fn find(resources: &[ManagedResource], kind: ResourceKind) -> ManagedResource {
        resources
            .iter()
            .find(|r| r.kind() == kind)
            .cloned()
            .unwrap_or_else(|| panic!("no {kind} synthesized"))
    }

    fn deployment(console: &WebConsole, facts: &CapabilityFacts) -> Deployment {
        match find(
            &synthesize(console, facts, &ObservedState::default()),
            ResourceKind::Deployment,
        ) {
            ManagedResource::Deployment(d) => d,
            _ => unreachable!(),
        }
    }

    fn env_of(deployment: &Deployment) -> Vec<EnvVar> {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap_or_default()
    }

    fn env_value(deployment: &Deployment, name: &str) -> Option<String> {
        env_of(deployment)
            .into_iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value)
    }

    fn volume_names(deployment: &Deployment) -> Vec<String> {
        deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.name.clone())
            .collect()
    }

    fn annotation(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, key: &str) -> String {
        meta.annotations.as_ref().unwrap()[key].clone()
    }

    fn template_annotation(deployment: &Deployment, key: &str) -> String {
        annotation(
            deployment.spec.as_ref().unwrap().template.metadata.as_ref().unwrap(),
            key,
        )
    }

    // -----------------------------------------------------------------------
    // Determinism and gating
    // -----------------------------------------------------------------------

    #[test]
    fn test_synthesis_is_deterministic() {
        let console = console(resolved_spec(DeploymentMode::Cluster));
        let observed = ObservedState {
            console_url: Some("https://console.example.com".to_string()),
            ..Default::default()
        };
        let first = synthesize(&console, &openshift(), &observed);
        let second = synthesize(&console, &openshift(), &observed);
        assert_eq!(first, second);
    }

    #[test]
    fn test_plain_kubernetes_gets_ingress_only() {
        let console = console(resolved_spec(DeploymentMode::Cluster));
        let resources = synthesize(&console, &kubernetes(), &ObservedState::default());
        assert_eq!(
            kinds(&resources),
            vec![
                ResourceKind::ServiceAccount,
                ResourceKind::ConfigMap,
                ResourceKind::Service,
                ResourceKind::Deployment,
                ResourceKind::Ingress,
            ]
        );
    }

    #[test]
    fn test_openshift_cluster_mode_full_set_in_apply_order() {
        let mut spec = resolved_spec(DeploymentMode::Cluster);
        spec.auth.client_cert_check_schedule = Some("0 3 * * *".to_string());
        let console = console(spec);
        let observed = ObservedState {
            console_url: Some("https://console.example.com".to_string()),
            ..Default::default()
        };

        let resources = synthesize(&console, &openshift(), &observed);
        assert_eq!(
            kinds(&resources),
            vec![
                ResourceKind::ServiceAccount,
                ResourceKind::OAuthClient,
                ResourceKind::ConfigMap,
                ResourceKind::Service,
                ResourceKind::Deployment,
                ResourceKind::Route,
                ResourceKind::ConsoleLink,
                ResourceKind::CronJob,
            ]
        );
    }

    #[test]
    fn test_console_link_waits_for_url() {
        let console = console(resolved_spec(DeploymentMode::Cluster));
        let resources = synthesize(&console, &openshift(), &ObservedState::default());
        assert!(!kinds(&resources).contains(&ResourceKind::ConsoleLink));
    }

    #[test]
    fn test_expiry_job_needs_schedule_and_openshift() {
        let mut spec = resolved_spec(DeploymentMode::Cluster);
        spec.auth.client_cert_check_schedule = Some("0 3 * * *".to_string());
        let console = console(spec);

        let on_kubernetes = synthesize(&console, &kubernetes(), &ObservedState::default());
        assert!(!kinds(&on_kubernetes).contains(&ResourceKind::CronJob));

        let job = match find(
            &synthesize(&console, &openshift(), &ObservedState::default()),
            ResourceKind::CronJob,
        ) {
            ManagedResource::CronJob(job) => job,
            _ => unreachable!(),
        };
        assert_eq!(
            job.metadata.name.as_deref(),
            Some("console-certificate-expiry-check")
        );
        let spec = job.spec.unwrap();
        assert_eq!(spec.schedule, "0 3 * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.containers[0].args.as_deref().unwrap(),
            [
                "check-certificate-expiry",
                "--cert-namespace",
                "tools",
                "--cert-expiration-period",
                "24"
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Cluster-scoped objects and OAuth
    // -----------------------------------------------------------------------

    #[test]
    fn test_oauth_client_is_cluster_scoped_and_unowned() {
        let console = console(resolved_spec(DeploymentMode::Cluster));
        let mut observed = ObservedState::default();
        observed.redirect_hosts.insert("b.example.com".to_string());
        observed.redirect_hosts.insert("a.example.com".to_string());

        let client = match find(
            &synthesize(&console, &openshift(), &observed),
            ResourceKind::OAuthClient,
        ) {
            ManagedResource::OAuthClient(client) => client,
            _ => unreachable!(),
        };
        assert_eq!(client.metadata.name.as_deref(), Some("tools-console"));
        assert!(client.metadata.namespace.is_none());
        assert!(client.metadata.owner_references.is_none());
        assert_eq!(
            client.redirect_uris,
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert_eq!(client.grant_method.as_deref(), Some("auto"));
    }

    #[test]
    fn test_namespace_mode_uses_service_account_redirects() {
        let mut spec = resolved_spec(DeploymentMode::Namespace);
        spec.external_routes = vec!["extra".to_string()];
        let console = console(spec);
        let resources = synthesize(&console, &openshift(), &ObservedState::default());
        assert!(!kinds(&resources).contains(&ResourceKind::OAuthClient));

        let settings = OperatorSettings::default();
        let facts = openshift();
        let observed = ObservedState::default();
        let account = build_service_account(&SynthesisInput {
            console: &console,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        });
        let annotations = account.metadata.annotations.unwrap();
        let keys: Vec<&str> = annotations.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "serviceaccounts.openshift.io/oauth-redirectreference.console",
                "serviceaccounts.openshift.io/oauth-redirectreference.extra",
            ]
        );
        assert!(annotations["serviceaccounts.openshift.io/oauth-redirectreference.extra"]
            .contains(r#""name":"extra""#));
    }

    #[test]
    fn test_console_link_location_follows_mode() {
        let settings = OperatorSettings::default();
        let facts = openshift();
        let observed = ObservedState {
            console_url: Some("https://console.example.com/".to_string()),
            ..Default::default()
        };

        let cluster = console(resolved_spec(DeploymentMode::Cluster));
        let link = build_console_link(&SynthesisInput {
            console: &cluster,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        })
        .unwrap()
        .unwrap();
        assert_eq!(link.metadata.name.as_deref(), Some("tools-console"));
        assert_eq!(link.spec.location, "ApplicationMenu");
        assert_eq!(link.spec.text, "Web Console");
        let menu = link.spec.application_menu.unwrap();
        assert_eq!(
            menu.image_url.as_deref(),
            Some("https://console.example.com/online/img/favicon.ico")
        );

        let namespaced = console(resolved_spec(DeploymentMode::Namespace));
        let link = build_console_link(&SynthesisInput {
            console: &namespaced,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        })
        .unwrap()
        .unwrap();
        assert_eq!(link.spec.location, "NamespaceDashboard");
        assert_eq!(link.spec.namespace_dashboard.unwrap().namespaces, vec!["tools"]);
    }

    // -----------------------------------------------------------------------
    // Pod template
    // -----------------------------------------------------------------------

    #[test]
    fn test_environment_by_mode_and_platform() {
        let cluster = deployment(&console(resolved_spec(DeploymentMode::Cluster)), &openshift());
        assert_eq!(env_value(&cluster, "WEBCONSOLE_MODE").as_deref(), Some("cluster"));
        assert_eq!(
            env_value(&cluster, "WEBCONSOLE_OAUTH_CLIENT_ID").as_deref(),
            Some("tools-console")
        );
        assert_eq!(env_value(&cluster, "WEBCONSOLE_GATEWAY").as_deref(), Some("true"));
        assert_eq!(
            env_value(&cluster, "PLATFORM_CLUSTER_VERSION").as_deref(),
            Some("4.14.3")
        );
        assert_eq!(
            env_value(&cluster, "PLATFORM_CONSOLE_URL").as_deref(),
            Some("https://console.apps.example.com")
        );
        assert!(!env_of(&cluster).iter().any(|e| e.name == "WEBCONSOLE_NAMESPACE"));

        let namespaced = deployment(
            &console(resolved_spec(DeploymentMode::Namespace)),
            &kubernetes(),
        );
        let namespace_var = env_of(&namespaced)
            .into_iter()
            .find(|e| e.name == "WEBCONSOLE_NAMESPACE")
            .unwrap();
        assert_eq!(
            namespace_var.value_from.unwrap().field_ref.unwrap().field_path,
            "metadata.namespace"
        );
        assert_eq!(
            env_value(&namespaced, "WEBCONSOLE_OAUTH_CLIENT_ID").as_deref(),
            Some("system:serviceaccount:tools:console")
        );
        assert!(env_value(&namespaced, "WEBCONSOLE_GATEWAY").is_none());
    }

    #[test]
    fn test_volumes_by_platform() {
        let mut spec = resolved_spec(DeploymentMode::Cluster);
        let on_kubernetes = deployment(&console(spec.clone()), &kubernetes());
        assert_eq!(volume_names(&on_kubernetes), vec!["serving-cert", "config"]);

        spec.rbac = RbacConfig {
            config_map: Some("console-acl".to_string()),
            disable_rbac_support: None,
        };
        let on_openshift = deployment(&console(spec.clone()), &openshift());
        assert_eq!(
            volume_names(&on_openshift),
            vec!["serving-cert", "proxying-cert", "config", "rbac"]
        );

        spec.auth.internal_ssl = Some(false);
        let without_ssl = deployment(&console(spec), &openshift());
        assert!(!volume_names(&without_ssl).contains(&"proxying-cert".to_string()));
    }

    #[test]
    fn test_metadata_propagation_never_overrides_owned_keys() {
        let mut spec = resolved_spec(DeploymentMode::Cluster);
        spec.metadata_propagation = MetadataPropagation {
            annotations: vec!["example.com/*".to_string()],
            labels: vec!["example.com/*".to_string(), "app".to_string()],
        };
        let mut console = console(spec);
        console.metadata.labels = Some(BTreeMap::from([
            ("example.com/tier".to_string(), "gold".to_string()),
            ("app".to_string(), "something-else".to_string()),
            ("team".to_string(), "web".to_string()),
        ]));
        console.metadata.annotations = Some(BTreeMap::from([(
            "example.com/owner".to_string(),
            "web-team".to_string(),
        )]));

        let deployment = deployment(&console, &kubernetes());
        let labels = deployment.metadata.labels.clone().unwrap();
        assert_eq!(labels["example.com/tier"], "gold");
        assert_eq!(labels["app"], "webconsole");
        assert!(!labels.contains_key("team"));
        assert_eq!(annotation(&deployment.metadata, "example.com/owner"), "web-team");
    }

    // -----------------------------------------------------------------------
    // Content versions
    // -----------------------------------------------------------------------

    #[test]
    fn test_config_change_rolls_pod_template() {
        let mut spec = resolved_spec(DeploymentMode::Cluster);
        let before = deployment(&console(spec.clone()), &kubernetes());

        spec.config.branding = Some(BrandingConfig {
            app_name: Some("Ops Console".to_string()),
            ..Default::default()
        });
        let after = deployment(&console(spec.clone()), &kubernetes());

        assert_ne!(
            template_annotation(&before, CONFIG_VERSION_ANNOTATION),
            template_annotation(&after, CONFIG_VERSION_ANNOTATION)
        );
        assert_ne!(
            annotation(&before.metadata, TEMPLATE_VERSION_ANNOTATION),
            annotation(&after.metadata, TEMPLATE_VERSION_ANNOTATION)
        );

        let settings = OperatorSettings::default();
        let facts = kubernetes();
        let observed = ObservedState::default();
        let console = console(spec);
        let config_map = build_config_map(&SynthesisInput {
            console: &console,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        })
        .unwrap();
        assert_eq!(
            annotation(&config_map.metadata, CONFIG_VERSION_ANNOTATION),
            template_annotation(&after, CONFIG_VERSION_ANNOTATION)
        );
        assert!(config_map.data.unwrap()["config.json"].contains("Ops Console"));
    }

    #[test]
    fn test_replica_change_keeps_template_version() {
        let mut spec = resolved_spec(DeploymentMode::Cluster);
        let one = deployment(&console(spec.clone()), &kubernetes());
        spec.replicas = Some(3);
        let three = deployment(&console(spec), &kubernetes());

        assert_eq!(three.spec.as_ref().unwrap().replicas, Some(3));
        assert_eq!(
            annotation(&one.metadata, TEMPLATE_VERSION_ANNOTATION),
            annotation(&three.metadata, TEMPLATE_VERSION_ANNOTATION)
        );
    }

    #[test]
    fn test_deployment_version_marker_matches_builder_input() {
        let console = console(resolved_spec(DeploymentMode::Cluster));
        let settings = OperatorSettings::default();
        let facts = kubernetes();
        let observed = ObservedState::default();
        let deployment = build_deployment(
            &SynthesisInput {
                console: &console,
                facts: &facts,
                settings: &settings,
                observed: &observed,
            },
            "abc123",
        )
        .unwrap();
        assert_eq!(template_annotation(&deployment, CONFIG_VERSION_ANNOTATION), "abc123");
    }

    // -----------------------------------------------------------------------
    // Network entry points
    // -----------------------------------------------------------------------

    #[test]
    fn test_route_termination_follows_internal_ssl() {
        let settings = OperatorSettings::default();
        let facts = openshift();
        let observed = ObservedState {
            serving_cert_pem: Some("SERVING PEM".to_string()),
            ..Default::default()
        };

        let mut spec = resolved_spec(DeploymentMode::Cluster);
        spec.route_hostname = Some("console.apps.example.com".to_string());
        let secure = console(spec.clone());
        let route = build_route(&SynthesisInput {
            console: &secure,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        });
        assert_eq!(route.spec.host.as_deref(), Some("console.apps.example.com"));
        let tls = route.spec.tls.unwrap();
        assert_eq!(tls.termination, "reencrypt");
        assert_eq!(tls.destination_ca_certificate.as_deref(), Some("SERVING PEM"));
        assert_eq!(tls.insecure_edge_termination_policy.as_deref(), Some("Redirect"));

        spec.auth.internal_ssl = Some(false);
        let plain = console(spec);
        let route = build_route(&SynthesisInput {
            console: &plain,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        });
        let tls = route.spec.tls.unwrap();
        assert_eq!(tls.termination, "edge");
        assert!(tls.destination_ca_certificate.is_none());
    }

    #[test]
    fn test_ingress_path_and_tls() {
        let settings = OperatorSettings::default();
        let facts = kubernetes();
        let observed = ObservedState::default();

        let mut spec = resolved_spec(DeploymentMode::Cluster);
        spec.route_hostname = Some("apps.example.com".to_string());
        spec.route = Some(RouteConfig {
            cert_secret: Some(LocalSecretReference {
                name: "apps-tls".to_string(),
            }),
            ca_cert: None,
        });
        let console = console(spec);
        let ingress = build_ingress(&SynthesisInput {
            console: &console,
            facts: &facts,
            settings: &settings,
            observed: &observed,
        });

        let spec = ingress.spec.unwrap();
        let rule = &spec.rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("apps.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/console(/|$)(.*)"));
        assert_eq!(path.path_type, "ImplementationSpecific");
        let tls = &spec.tls.as_ref().unwrap()[0];
        assert_eq!(tls.secret_name.as_deref(), Some("apps-tls"));
        assert_eq!(tls.hosts.as_deref().unwrap(), ["apps.example.com"]);
    }

    #[test]
    fn test_namespaced_objects_are_owned() {
        let console = console(resolved_spec(DeploymentMode::Cluster));
        for resource in synthesize(&console, &kubernetes(), &ObservedState::default()) {
            let owners = resource.metadata().owner_references.clone().unwrap();
            assert_eq!(owners.len(), 1, "{} has one owner", resource.kind());
            assert_eq!(owners[0].uid, "uid-console");
            assert_eq!(owners[0].controller, Some(true));
        }
    }
}
