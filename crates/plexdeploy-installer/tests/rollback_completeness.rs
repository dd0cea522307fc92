mod common;

use common::FakeHost;
use plexdeploy_core::context::InstallationContext;
use plexdeploy_installer::rollback::{rollback, RollbackStep};

const DOMAIN: &str = "tickets.example.com";

/// 按位构造上下文：bit0 目录 / bit1 服务 / bit2 站点 / bit3 证书 / bit4 端口。
fn context_for(mask: u8, install_path: &std::path::Path) -> InstallationContext {
    let mut ctx = InstallationContext::new("plextickets", "plextickets", install_path, 3000)
        .with_domain(DOMAIN, Some("ops@example.com".to_string()));
    if mask & 0b00001 != 0 {
        ctx.mark_install_path_ready();
    }
    if mask & 0b00010 != 0 {
        ctx.mark_service_created();
    }
    if mask & 0b00100 != 0 {
        ctx.mark_nginx_configured();
    }
    if mask & 0b01000 != 0 {
        ctx.mark_ssl_configured();
    }
    if mask & 0b10000 != 0 {
        ctx.mark_port_opened(3000);
    }
    ctx
}

#[test]
fn rollback_reverses_exactly_the_recorded_side_effects() {
    for mask in 0u8..32 {
        let dir = tempfile::tempdir().unwrap();
        let install_path = dir.path().join("plextickets");
        std::fs::create_dir_all(install_path.join("node_modules")).unwrap();
        std::fs::write(install_path.join("package.json"), "{}").unwrap();

        let ctx = context_for(mask, &install_path);
        let host = FakeHost::new();
        let report = rollback(&ctx, &host);

        let dir_flag = mask & 0b00001 != 0;
        let service = mask & 0b00010 != 0;
        let site = mask & 0b00100 != 0;
        let cert = mask & 0b01000 != 0;
        let port = mask & 0b10000 != 0;

        assert_eq!(host.called("remove_service"), service, "mask={mask:05b}");
        assert_eq!(host.called("remove_site"), site, "mask={mask:05b}");
        assert_eq!(host.called("delete_certificate"), cert, "mask={mask:05b}");
        assert_eq!(host.called("close_port"), port, "mask={mask:05b}");
        assert_eq!(install_path.exists(), !dir_flag, "mask={mask:05b}");

        assert_eq!(report.attempted(RollbackStep::Service), service);
        assert_eq!(report.attempted(RollbackStep::ProxySite), site);
        assert_eq!(report.attempted(RollbackStep::Certificate), cert);
        assert_eq!(report.attempted(RollbackStep::InstallDirectory), dir_flag);
        assert_eq!(report.attempted(RollbackStep::FirewallPort), port);
        assert!(report.is_clean(), "mask={mask:05b}: {report:?}");
        assert!(!host.called("register_service"));
        assert!(!host.called("open_port"));
    }
}

#[test]
fn rollback_runs_in_reverse_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let install_path = dir.path().join("plextickets");
    std::fs::create_dir_all(&install_path).unwrap();
    let ctx = context_for(0b11111, &install_path);
    let host = FakeHost::new();

    let report = rollback(&ctx, &host);
    let steps: Vec<RollbackStep> = report.actions.iter().map(|a| a.step).collect();
    assert_eq!(
        steps,
        vec![
            RollbackStep::Service,
            RollbackStep::ProxySite,
            RollbackStep::Certificate,
            RollbackStep::InstallDirectory,
            RollbackStep::FirewallPort,
        ]
    );
    assert_eq!(
        host.calls(),
        vec![
            "remove_service:plextickets".to_string(),
            format!("remove_site:{DOMAIN}"),
            format!("delete_certificate:{DOMAIN}"),
            "close_port:3000".to_string(),
        ]
    );
}

#[test]
fn one_failed_sub_step_does_not_stop_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let install_path = dir.path().join("plextickets");
    std::fs::create_dir_all(&install_path).unwrap();
    let ctx = context_for(0b11111, &install_path);
    let host = FakeHost::new().fail_on("remove_site");

    let report = rollback(&ctx, &host);
    assert!(!report.is_clean());
    let failed: Vec<RollbackStep> = report.failures().map(|a| a.step).collect();
    assert_eq!(failed, vec![RollbackStep::ProxySite]);
    assert!(host.called("delete_certificate"));
    assert!(host.called("close_port"));
    assert!(!install_path.exists());
}

#[test]
fn missing_domain_is_recorded_as_a_sub_step_failure() {
    let dir = tempfile::tempdir().unwrap();
    let install_path = dir.path().join("plexstaff");
    let mut ctx = InstallationContext::new("plexstaff", "plexstaff", &install_path, 3001);
    ctx.mark_nginx_configured();
    ctx.mark_port_opened(3001);
    let host = FakeHost::new();

    let report = rollback(&ctx, &host);
    assert!(!host.called("remove_site"));
    assert!(host.called("close_port"));
    let failed: Vec<RollbackStep> = report.failures().map(|a| a.step).collect();
    assert_eq!(failed, vec![RollbackStep::ProxySite]);
}

#[test]
fn nothing_recorded_means_nothing_attempted() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = InstallationContext::new("plexstaff", "plexstaff", dir.path().join("x"), 3001);
    let host = FakeHost::new();
    let report = rollback(&ctx, &host);
    assert!(report.actions.is_empty());
    assert!(host.calls().is_empty());
}
