//! MongoDB 用户开通与连通性检查（基于 `mongosh`）。
//!
//! 说明：
//! - 只负责在已运行的 MongoDB 上为实例创建专属库与用户，不负责安装 MongoDB 服务本身
//! - 创建用户按固定次数与固定间隔重试（服务刚启动时可能短暂拒绝连接）
//! - 生成的凭据追加写入权限为 0600 的凭据文件
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use plexdeploy_core::context::DatabaseCredential;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::process::run_with_timeout;

/// 数据库服务器地址。
#[derive(Debug, Clone)]
pub struct MongoServer {
    pub host: String,
    pub port: u16,
}

/// 生成仅含字母数字的随机密码（无需在 URI/JS 中转义）。
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// 将实例名转换为数据库名/用户名（`-` 替换为 `_`）。
pub fn database_name(instance: &str) -> String {
    instance.replace('-', "_")
}

/// 拼接连接串。
pub fn connection_string(server: &MongoServer, database: &str, username: &str, password: &str) -> String {
    format!(
        "mongodb://{username}:{password}@{}:{}/{database}?authSource={database}",
        server.host, server.port
    )
}

/// 为实例创建数据库用户（带重试）。
///
/// 参数：
/// - `server`：MongoDB 地址
/// - `instance`：实例名（决定库名与用户名）
/// - `attempts`：最大尝试次数（至少 1 次）
/// - `backoff`：两次尝试之间的固定间隔
/// - `timeout`：单次 `mongosh` 调用超时
///
/// 返回值：
/// - 新生成的凭据
///
/// 异常处理：
/// - 全部尝试失败后返回最后一次的错误
pub fn provision_user(
    server: &MongoServer,
    instance: &str,
    attempts: u32,
    backoff: Duration,
    timeout: Duration,
) -> Result<DatabaseCredential> {
    let database = database_name(instance);
    let username = database.clone();
    let password = generate_password(24);
    let script = format!(
        "db.getSiblingDB('{database}').createUser({{user:'{username}',pwd:'{password}',roles:[{{role:'readWrite',db:'{database}'}}]}})"
    );
    let port = server.port.to_string();
    let args = ["--quiet", "--host", server.host.as_str(), "--port", port.as_str(), "--eval", script.as_str()];

    let attempts = attempts.max(1);
    let mut last_err = anyhow!("未执行数据库用户创建");
    for attempt in 1..=attempts {
        match run_with_timeout("mongosh", &args, None, timeout) {
            Ok(out) if out.success() => {
                info!("已创建数据库用户: {}", username);
                return Ok(DatabaseCredential {
                    connection_string: connection_string(server, &database, &username, &password),
                    database,
                    username,
                    password,
                });
            }
            Ok(out) => {
                last_err = anyhow!("mongosh 返回 {}: {}", out.status, out.stderr.trim());
            }
            Err(e) => last_err = e,
        }
        if attempt < attempts {
            warn!("创建数据库用户失败（第 {}/{} 次），{:?} 后重试", attempt, attempts, backoff);
            thread::sleep(backoff);
        }
    }
    Err(last_err.context(format!("创建数据库用户失败: {username}")))
}

/// 使用连接串认证并执行 ping。
pub fn ping(connection_string: &str, timeout: Duration) -> Result<()> {
    let out = run_with_timeout(
        "mongosh",
        &[connection_string, "--quiet", "--eval", "db.runCommand({ping:1}).ok"],
        None,
        timeout,
    )?;
    if out.success() && out.stdout.trim() == "1" {
        return Ok(());
    }
    Err(anyhow!("数据库 ping 失败: {} {}", out.stdout.trim(), out.stderr.trim()))
}

/// 写入一条临时文档、读回并删除。
pub fn write_read_check(connection_string: &str, timeout: Duration) -> Result<()> {
    let marker = generate_password(12);
    let script = format!(
        "const c=db.getCollection('_plexdeploy_selftest');\
c.insertOne({{marker:'{marker}'}});\
const d=c.findOne({{marker:'{marker}'}});\
c.deleteMany({{marker:'{marker}'}});\
print(d?'ok':'missing')"
    );
    let out = run_with_timeout(
        "mongosh",
        &[connection_string, "--quiet", "--eval", script.as_str()],
        None,
        timeout,
    )?;
    if out.success() && out.stdout.trim() == "ok" {
        return Ok(());
    }
    Err(anyhow!("数据库读写校验失败: {} {}", out.stdout.trim(), out.stderr.trim()))
}

/// 将凭据追加写入凭据文件（文件权限 0600）。
///
/// 异常处理：
/// - 创建目录、打开或写入失败返回错误
pub fn append_credentials(file: &Path, instance: &str, credential: &DatabaseCredential) -> Result<()> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("创建目录失败: {}", parent.display()))?;
    }
    let mut opts = std::fs::OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts
        .open(file)
        .with_context(|| format!("打开凭据文件失败: {}", file.display()))?;
    writeln!(
        f,
        "[{instance}]\ndatabase={}\nusername={}\npassword={}\nuri={}\n",
        credential.database, credential.username, credential.password, credential.connection_string
    )
    .with_context(|| format!("写入凭据文件失败: {}", file.display()))?;
    crate::service::set_mode(file, 0o600)?;
    Ok(())
}
