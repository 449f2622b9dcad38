//! Unit tests for WebConsoleSpec validation
//!
//! Tests the `WebConsoleSpec::validate()` function to ensure it correctly
//! accepts valid configurations and rejects invalid ones, plus the wire
//! format of the record.

#[cfg(test)]
mod web_console_spec_validation {
    use crate::crd::{DeploymentMode, MetadataPropagation, SpecValidationError, WebConsoleSpec};

    /// Helper to create a minimal valid spec
    fn valid_spec() -> WebConsoleSpec {
        let mut spec = WebConsoleSpec {
            deployment_mode: Some(DeploymentMode::Cluster),
            replicas: Some(2),
            route_hostname: Some("console.apps.example.com".to_string()),
            ..Default::default()
        };
        spec.auth.client_cert_check_schedule = Some("0 */12 * * *".to_string());
        spec.auth.client_cert_expiration_period = Some(24);
        spec
    }

    fn fields(errors: Vec<SpecValidationError>) -> Vec<String> {
        errors.into_iter().map(|e| e.field).collect()
    }

    #[test]
    fn test_valid_spec_passes_validation() {
        assert!(valid_spec().validate().is_ok());
        assert!(WebConsoleSpec::default().validate().is_ok());
    }

    #[test]
    fn test_negative_replicas_fail() {
        let mut spec = valid_spec();
        spec.replicas = Some(-1);
        assert_eq!(fields(spec.validate().unwrap_err()), vec!["spec.replicas"]);

        spec.replicas = Some(0);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_invalid_cron_schedule_fails() {
        let mut spec = valid_spec();
        spec.auth.client_cert_check_schedule = Some("every day".to_string());
        assert_eq!(
            fields(spec.validate().unwrap_err()),
            vec!["spec.auth.clientCertCheckSchedule"]
        );
    }

    #[test]
    fn test_non_positive_rotation_period_fails() {
        let mut spec = valid_spec();
        spec.auth.client_cert_expiration_period = Some(0);
        let errors = spec.validate().unwrap_err();
        assert_eq!(errors[0].field, "spec.auth.clientCertExpirationPeriod");
        assert!(!errors[0].how_to_fix.is_empty());
    }

    #[test]
    fn test_route_hostname_must_be_dns_name() {
        let mut spec = valid_spec();
        for bad in ["Console.example.com", "-console.example.com", "a..b", ""] {
            spec.route_hostname = Some(bad.to_string());
            assert_eq!(
                fields(spec.validate().unwrap_err()),
                vec!["spec.routeHostname"],
                "{bad:?} rejected"
            );
        }
        spec.route_hostname = Some("console-1.apps.example.com".to_string());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_malformed_glob_fails() {
        let mut spec = valid_spec();
        spec.metadata_propagation = MetadataPropagation {
            annotations: vec!["example.com/*".to_string()],
            labels: vec!["team-[".to_string()],
        };
        assert_eq!(
            fields(spec.validate().unwrap_err()),
            vec!["spec.metadataPropagation.labels"]
        );
    }

    #[test]
    fn test_all_errors_are_reported() {
        let mut spec = valid_spec();
        spec.replicas = Some(-3);
        spec.auth.client_cert_expiration_period = Some(-1);
        spec.external_routes = vec![String::new()];
        assert_eq!(
            fields(spec.validate().unwrap_err()),
            vec![
                "spec.replicas",
                "spec.auth.clientCertExpirationPeriod",
                "spec.externalRoutes"
            ]
        );
    }
}

#[cfg(test)]
mod web_console_wire_format {
    use crate::crd::{ConsolePhase, DeploymentMode, WebConsole, WebConsoleSpec, WebConsoleStatus};
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_reads_type_field() {
        let spec: WebConsoleSpec = serde_json::from_value(serde_json::json!({
            "type": "Namespace",
            "routeHostname": "console.example.com",
            "auth": {"internalSSL": false, "clientCertExpirationPeriod": 12},
            "config": {"branding": {"appName": "Ops"}}
        }))
        .unwrap();
        assert_eq!(spec.deployment_mode, Some(DeploymentMode::Namespace));
        assert_eq!(spec.auth.internal_ssl, Some(false));
        assert_eq!(spec.auth.client_cert_expiration_period, Some(12));
        assert_eq!(
            spec.config.branding.unwrap().app_name.as_deref(),
            Some("Ops")
        );
    }

    #[test]
    fn test_unset_mode_is_omitted() {
        let value = serde_json::to_value(WebConsoleSpec::default()).unwrap();
        assert!(value.get("type").is_none());
    }

    #[test]
    fn test_status_url_field_name() {
        let status = WebConsoleStatus {
            phase: Some(ConsolePhase::Deployed),
            url: Some("https://console.example.com".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["URL"], "https://console.example.com");
        assert_eq!(value["phase"], "Deployed");
    }

    #[test]
    fn test_status_patch_clears_unset_fields() {
        let status = WebConsoleStatus {
            phase: Some(ConsolePhase::Deployed),
            replicas: None,
            ..Default::default()
        };
        let patch = status.merge_patch();
        let fields = patch["status"].as_object().unwrap();
        assert_eq!(fields["phase"], "Deployed");
        for key in ["image", "URL", "replicas", "selector"] {
            assert!(fields[key].is_null(), "{key} sent as null");
        }
    }

    #[test]
    fn test_route_schema_includes_target_port() {
        let crd = crate::crd::Route::crd();
        assert_eq!(crd.spec.group, "route.openshift.io");
        let schema = serde_json::to_string(&crd.spec.versions[0].schema).unwrap();
        assert!(schema.contains("targetPort"));
    }

    #[test]
    fn test_crd_metadata() {
        let crd = WebConsole::crd();
        assert_eq!(crd.spec.group, "webconsole.io");
        assert_eq!(crd.spec.names.kind, "WebConsole");
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().unwrap().scale.is_some());
    }
}
