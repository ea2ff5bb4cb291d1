//! Template payload construction

use crate::control::route::normalize_route_prefix;
use crate::core::Project;
use serde_json::{json, Value};
use std::str::FromStr;

const DEFAULT_LOGO: &str = "https://emcp.kaleido.guru/logo/default-mcp-logo.png";
const PYPI_MIRROR: &str = "https://pypi.tuna.tsinghua.edu.cn/simple/";

/// How the marketplace launches a published package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Npm,
    Pypi,
    Deno,
    Docker,
}

impl PackageKind {
    pub fn code(&self) -> u8 {
        match self {
            PackageKind::Npm => 1,
            PackageKind::Pypi => 2,
            PackageKind::Deno => 3,
            PackageKind::Docker => 4,
        }
    }

    /// Launch command for a package of this kind
    pub fn command(&self, package: &str) -> String {
        match self {
            PackageKind::Npm => format!("npx {}", package),
            PackageKind::Pypi => format!("uvx {}", package),
            PackageKind::Deno => format!("deno {}", package),
            PackageKind::Docker => String::new(),
        }
    }
}

impl FromStr for PackageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "npm" | "npx" => Ok(PackageKind::Npm),
            "pypi" | "pip" | "uvx" => Ok(PackageKind::Pypi),
            "deno" => Ok(PackageKind::Deno),
            "docker" | "container" => Ok(PackageKind::Docker),
            other => anyhow::bail!("unknown package type '{}'", other),
        }
    }
}

/// Multilingual field: simplified Chinese, traditional Chinese, English.
/// Missing translations fall back to the simplified text.
pub fn multi_lang(cn: &str, tw: Option<&str>, en: Option<&str>) -> Value {
    json!([
        {"type": 1, "content": cn},
        {"type": 2, "content": tw.unwrap_or(cn)},
        {"type": 3, "content": en.unwrap_or(cn)},
    ])
}

fn mirror_arg() -> Value {
    json!({
        "arg_name": "UV_INDEX_URL",
        "default_value": PYPI_MIRROR,
        "description": multi_lang(
            "PyPI 镜像源地址",
            Some("PyPI 鏡像源地址"),
            Some("PyPI mirror index URL"),
        ),
        "auth_method_id": "",
        "type": 2,
        "paramter_type": 1,
        "input_source": 1,
        "showDefault": false,
        "oauth_authorized": false,
    })
}

/// Build the create/update payload for a project's marketplace template.
///
/// Reads `package_name`, `package_type` (default pypi), `summary`,
/// `description`, `logo_url`, `category_id` and the `_en`/`_tw`
/// translations from project metadata. The route prefix is always
/// normalized.
pub fn template_payload(project: &Project) -> Value {
    let package = project.package_name();
    let kind = project
        .meta("package_type")
        .and_then(|t| t.parse().ok())
        .unwrap_or(PackageKind::Pypi);
    let text = |key: &str, fallback: &str| -> String {
        project.meta(key).unwrap_or(fallback).to_string()
    };
    let summary = text("summary", &project.name);
    let description = text("description", &summary);

    let route_source = project.meta("route_prefix").unwrap_or(package);
    let args = if kind == PackageKind::Pypi {
        vec![mirror_arg()]
    } else {
        Vec::new()
    };

    json!({
        "name": multi_lang(&project.name, project.meta("name_tw"), project.meta("name_en")),
        "summary": multi_lang(&summary, project.meta("summary_tw"), project.meta("summary_en")),
        "description": multi_lang(
            &description,
            project.meta("description_tw"),
            project.meta("description_en"),
        ),
        "logo_url": text("logo_url", DEFAULT_LOGO),
        "template_category_id": text("category_id", ""),
        "template_source_id": package,
        "command": kind.command(package),
        "route_prefix": normalize_route_prefix(route_source),
        "package_type": kind.code(),
        "mcp_host": 1,
        "publish_type": 1,
        "expose_protocal": 0,
        "args": args,
        "enable_display": true,
        "is_attach_user_storage": false,
        "attach_container_path": "",
        "auth_method_id": "",
        "container_port": if kind == PackageKind::Docker { "3000" } else { "" },
        "server_image": if kind == PackageKind::Docker { package } else { "" },
    })
}
