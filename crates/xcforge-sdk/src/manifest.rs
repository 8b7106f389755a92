//! Framework manifest generation.
//!
//! `Info.plist` and `module.modulemap` files are rendered from templates
//! embedded at compile time. Rendering is plain `{{NAME}}` substitution; any
//! placeholder left over after rendering is reported as an error rather than
//! shipped inside a framework.

use std::path::Path;

use include_dir::{Dir, include_dir};

use crate::types::{BuildError, Platform, Stage, TargetSpec};

const FRAMEWORK_TEMPLATES: Dir = include_dir!("$CARGO_MANIFEST_DIR/templates/framework");

/// Template variable that can be replaced in template files
#[derive(Debug, Clone)]
pub struct TemplateVar {
    pub name: &'static str,
    pub value: String,
}

/// Renders the framework `Info.plist` for one platform.
pub fn render_info_plist(spec: &TargetSpec, platform: Platform) -> Result<String, BuildError> {
    let vars = [
        TemplateVar {
            name: "PACKAGE_NAME",
            value: spec.package_name.clone(),
        },
        TemplateVar {
            name: "BUNDLE_ID",
            value: spec.bundle_id.clone(),
        },
        TemplateVar {
            name: "DISPLAY_NAME",
            value: spec.package_name.clone(),
        },
        TemplateVar {
            name: "VERSION",
            value: short_version(&spec.version),
        },
        TemplateVar {
            name: "BUILD_NUMBER",
            value: spec.build_number.clone(),
        },
        TemplateVar {
            name: "SUPPORTED_PLATFORM",
            value: platform.bundle_platform().to_string(),
        },
        TemplateVar {
            name: "MIN_OS",
            value: spec.min_os.clone(),
        },
    ];
    render_embedded("Info.plist.template", &vars)
}

/// Renders a module map when the target declares an umbrella header.
pub fn render_module_map(spec: &TargetSpec) -> Result<Option<String>, BuildError> {
    let Some(umbrella) = &spec.umbrella_header else {
        return Ok(None);
    };
    let vars = [
        TemplateVar {
            name: "PACKAGE_NAME",
            value: spec.package_name.clone(),
        },
        TemplateVar {
            name: "UMBRELLA_HEADER",
            value: umbrella.clone(),
        },
    ];
    render_embedded("module.modulemap.template", &vars).map(Some)
}

/// Short version string derived from the pinned version.
///
/// `CFBundleShortVersionString` accepts at most three dot-separated integers,
/// so a leading `v` and any pre-release or tag suffix are dropped:
/// `v3.21.12` -> `3.21.12`, `mosh-1.4.0` -> `1.4.0`, `1.2.3-rc1` -> `1.2.3`.
/// Versions with no numeric component are kept as-is.
pub fn short_version(version: &str) -> String {
    let start = version.find(|c: char| c.is_ascii_digit());
    let Some(start) = start else {
        return version.to_string();
    };
    let numeric: String = version[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let parts: Vec<&str> = numeric
        .split('.')
        .filter(|p| !p.is_empty())
        .take(3)
        .collect();
    parts.join(".")
}

fn render_embedded(name: &str, vars: &[TemplateVar]) -> Result<String, BuildError> {
    let file = FRAMEWORK_TEMPLATES.get_file(name).ok_or_else(|| {
        BuildError::Config(format!("embedded template {} is missing", name))
    })?;
    let text = file.contents_utf8().ok_or_else(|| {
        BuildError::Config(format!("embedded template {} is not UTF-8", name))
    })?;
    let rendered = render_template(text, vars);
    validate_no_unreplaced_placeholders(&rendered, Path::new(name))?;
    Ok(rendered)
}

fn render_template(input: &str, vars: &[TemplateVar]) -> String {
    let mut output = input.to_string();
    for var in vars {
        output = output.replace(&format!("{{{{{}}}}}", var.name), &var.value);
    }
    output
}

/// Validates that no unreplaced template placeholders remain in the rendered content
fn validate_no_unreplaced_placeholders(content: &str, file_path: &Path) -> Result<(), BuildError> {
    let mut pos = 0;
    let mut unreplaced = Vec::new();

    while let Some(start) = content[pos..].find("{{") {
        let abs_start = pos + start;
        if let Some(end) = content[abs_start..].find("}}") {
            let placeholder = &content[abs_start..abs_start + end + 2];
            let var_name = &content[abs_start + 2..abs_start + end];
            if !var_name.contains(' ') && !var_name.is_empty() {
                unreplaced.push(placeholder.to_string());
            }
            pos = abs_start + end + 2;
        } else {
            break;
        }
    }

    if !unreplaced.is_empty() {
        return Err(Stage::Assembly.error(
            file_path.display().to_string(),
            format!("unreplaced template placeholders: {:?}", unreplaced),
            None,
        ));
    }

    Ok(())
}
