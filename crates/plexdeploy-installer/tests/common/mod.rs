#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use plexdeploy_core::config::{InstallerConfig, SelfTestConfig};
use plexdeploy_core::context::DatabaseCredential;
use plexdeploy_core::paths::Layout;
use plexdeploy_installer::host::{HealthProbe, PortOpening, Provisioner, RenewMode, ServiceAction};
use plexdeploy_linux::permissions::PermissionOutcome;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// 记录型宿主替身：记录全部调用，按名称注入失败。
pub struct FakeHost {
    calls: RefCell<Vec<String>>,
    failing: RefCell<BTreeSet<&'static str>>,
    pub node_major: Cell<u32>,
    pub service_active: Cell<bool>,
    /// 端口从第 N 次探测起可达（0 表示始终不可达）。
    pub port_reachable_from: Cell<u32>,
    port_probes: Cell<u32>,
    pub database_ok: Cell<bool>,
    pub resolved: RefCell<Vec<IpAddr>>,
    pub public_ip: Cell<Option<IpAddr>>,
    /// 防火墙规则是否原本就存在。
    pub port_already_open: Cell<bool>,
    pauses: RefCell<Vec<Duration>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            failing: RefCell::new(BTreeSet::new()),
            node_major: Cell::new(20),
            service_active: Cell::new(true),
            port_reachable_from: Cell::new(1),
            port_probes: Cell::new(0),
            database_ok: Cell::new(true),
            resolved: RefCell::new(vec![IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))]),
            public_ip: Cell::new(Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))),
            port_already_open: Cell::new(false),
            pauses: RefCell::new(Vec::new()),
        }
    }

    pub fn fail_on(self, op: &'static str) -> Self {
        self.failing.borrow_mut().insert(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// 以 `op` 开头的调用（`op:参数`）。
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op}:");
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn called(&self, op: &str) -> bool {
        !self.calls_to(op).is_empty()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.borrow().clone()
    }

    fn record(&self, op: &'static str, arg: impl std::fmt::Display) -> Result<()> {
        self.calls.borrow_mut().push(format!("{op}:{arg}"));
        if self.failing.borrow().contains(op) {
            return Err(anyhow!("{op} 注入失败"));
        }
        Ok(())
    }
}

impl Provisioner for FakeHost {
    fn install_dependencies(&self, app_dir: &Path) -> Result<()> {
        self.record("install_dependencies", app_dir.display())
    }

    fn apply_permissions(&self, root: &Path) -> PermissionOutcome {
        let _ = self.record("apply_permissions", root.display());
        PermissionOutcome::default()
    }

    fn provision_database(&self, instance: &str) -> Result<DatabaseCredential> {
        self.record("provision_database", instance)?;
        let name = instance.replace('-', "_");
        Ok(DatabaseCredential {
            database: name.clone(),
            username: name.clone(),
            password: "pw".into(),
            connection_string: format!("mongodb://{name}:pw@127.0.0.1:27017/{name}"),
        })
    }

    fn open_port(&self, port: u16, _comment: &str) -> Result<PortOpening> {
        self.record("open_port", port)?;
        Ok(if self.port_already_open.get() {
            PortOpening::AlreadyOpen
        } else {
            PortOpening::Added
        })
    }

    fn close_port(&self, port: u16) -> Result<()> {
        self.record("close_port", port)
    }

    fn configure_site(&self, domain: &str, _port: u16, _error_page_root: &Path) -> Result<()> {
        self.record("configure_site", domain)
    }

    fn remove_site(&self, domain: &str) -> Result<()> {
        self.record("remove_site", domain)
    }

    fn obtain_certificate(&self, domain: &str, _email: &str) -> Result<()> {
        self.record("obtain_certificate", domain)
    }

    fn delete_certificate(&self, domain: &str) -> Result<()> {
        self.record("delete_certificate", domain)
    }

    fn register_service(&self, instance: &str, _install_path: &Path) -> Result<()> {
        self.record("register_service", instance)
    }

    fn remove_service(&self, instance: &str) -> Result<()> {
        self.record("remove_service", instance)
    }

    fn control_service(&self, instance: &str, action: ServiceAction) -> Result<()> {
        self.record("control_service", format!("{}:{instance}", action.as_str()))
    }

    fn renew_certificates(&self, mode: RenewMode) -> Result<String> {
        self.record("renew_certificates", format!("{mode:?}"))?;
        Ok(format!("renewed ({mode:?})"))
    }
}

impl HealthProbe for FakeHost {
    fn node_major(&self) -> Result<u32> {
        Ok(self.node_major.get())
    }

    fn service_active(&self, _service: &str) -> bool {
        self.service_active.get()
    }

    fn port_reachable(&self, _port: u16) -> bool {
        let n = self.port_probes.get() + 1;
        self.port_probes.set(n);
        let from = self.port_reachable_from.get();
        from != 0 && n >= from
    }

    fn http_status(&self, _url: &str) -> Result<u16> {
        Ok(200)
    }

    fn database_ping(&self, _connection_string: &str) -> Result<()> {
        if self.database_ok.get() {
            Ok(())
        } else {
            Err(anyhow!("Authentication failed"))
        }
    }

    fn database_write_read(&self, _connection_string: &str) -> Result<()> {
        Ok(())
    }

    fn proxy_syntax_ok(&self) -> bool {
        true
    }

    fn resolve(&self, _domain: &str) -> Result<Vec<IpAddr>> {
        Ok(self.resolved.borrow().clone())
    }

    fn public_ip(&self) -> Option<IpAddr> {
        self.public_ip.get()
    }

    fn tls_handshake(&self, _domain: &str) -> Result<()> {
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        self.pauses.borrow_mut().push(duration);
    }

    fn service_status(&self, service: &str) -> Result<String> {
        self.record("service_status", service)?;
        let state = if self.service_active.get() { "active (running)" } else { "inactive (dead)" };
        Ok(format!("{service}.service\n   Active: {state}\n"))
    }

    fn service_logs(&self, service: &str, lines: usize) -> Result<String> {
        self.record("service_logs", format!("{service}:{lines}"))?;
        Ok(format!("-- Logs for {service} --\n"))
    }

    fn certificate_status(&self) -> Result<String> {
        self.record("certificate_status", "all")?;
        Ok("Found the following certs:\n".to_string())
    }
}

/// zip 条目描述。
pub enum Entry<'a> {
    File(&'a str, &'a str),
    Dir(&'a str),
    Symlink(&'a str, &'a str),
}

/// 按条目顺序写出一个 zip 归档。
pub fn write_zip(path: &Path, entries: &[Entry<'_>]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create archive parent");
    }
    let file = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for entry in entries {
        match entry {
            Entry::File(name, content) => {
                zip.start_file(*name, options).expect("start_file");
                zip.write_all(content.as_bytes()).expect("write entry");
            }
            Entry::Dir(name) => zip.add_directory(*name, options).expect("add_directory"),
            Entry::Symlink(name, target) => {
                zip.add_symlink(*name, *target, options).expect("add_symlink")
            }
        }
    }
    zip.finish().expect("finish zip");
}

/// 目录下的条目名（排序）。
pub fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// 全部路径都落在临时目录中的安装器配置。
pub struct Sandbox {
    pub dir: TempDir,
    pub config: InstallerConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let config = InstallerConfig {
            install_root: root.join("www"),
            nginx_available: root.join("nginx/sites-available"),
            nginx_enabled: root.join("nginx/sites-enabled"),
            systemd_unit_dir: root.join("systemd"),
            letsencrypt_live: root.join("letsencrypt/live"),
            state_dir: root.join("state"),
            credentials_file: root.join("credentials"),
            lock_file: root.join("plexdeploy.lock"),
            archive_search_dirs: vec![root.join("downloads")],
            archive_search_depth: 2,
            selftest: SelfTestConfig {
                service_attempts: 3,
                service_interval_ms: 10,
                port_attempts: 4,
                port_interval_ms: 20,
            },
            ..InstallerConfig::default()
        };
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.config)
    }

    pub fn downloads(&self) -> PathBuf {
        self.path().join("downloads")
    }

    /// 写出一个最小可用的应用归档（单目录打包）。
    pub fn app_archive(&self, file_name: &str, top: &str) -> PathBuf {
        let path = self.downloads().join(file_name);
        let package = format!("{top}/package.json");
        let index = format!("{top}/index.js");
        let config = format!("{top}/config.yml");
        write_zip(
            &path,
            &[
                Entry::File(&package, r#"{"name":"app","main":"index.js"}"#),
                Entry::File(&index, "console.log('hi')"),
                Entry::File(&config, "port: 3001\n"),
            ],
        );
        path
    }
}
