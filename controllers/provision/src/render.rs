//! Boot response rendering.
//!
//! Substitutes `{{variable}}` placeholders in the response template from the
//! merged ConfigMap/Secret values. An unresolved variable is a render
//! failure, not an empty string; the Provision fails with the variable name
//! in its message.

use crds::{BootResponse, ResponseTemplateSpec};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// A `{{name}}` placeholder has no value in the merged variables
    #[error("unresolved template variable {0:?}")]
    UnresolvedVariable(String),

    /// A `{{` without a closing `}}`
    #[error("unterminated variable reference in template")]
    UnterminatedVariable,
}

/// Replaces every `{{name}}` in `template` with its value from `vars`.
pub fn substitute(template: &str, vars: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(RenderError::UnterminatedVariable)?;
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| RenderError::UnresolvedVariable(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Renders the boot response for one machine from its template, the media
/// artifact paths, and the merged variables.
pub fn render_response(
    template: &ResponseTemplateSpec,
    kernel: &str,
    initrd: &str,
    vars: &BTreeMap<String, String>,
) -> Result<BootResponse, RenderError> {
    let cmdline = substitute(&template.cmdline, vars)?;
    let message = match &template.message {
        Some(message) => Some(substitute(message, vars)?),
        None => None,
    };
    let mut initrds = vec![initrd.to_string()];
    initrds.extend(template.extra_initrds.iter().cloned());
    Ok(BootResponse {
        kernel: kernel.to_string(),
        initrd: initrds,
        cmdline: (!cmdline.is_empty()).then_some(cmdline),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn substitutes_variables() {
        let resolved = substitute(
            "console=ttyS0 hostname={{hostname}} domain={{ domain }}",
            &vars(&[("hostname", "node-1"), ("domain", "rack1.local")]),
        )
        .unwrap();
        assert_eq!(resolved, "console=ttyS0 hostname=node-1 domain=rack1.local");
    }

    #[test]
    fn unresolved_variable_is_an_error() {
        let err = substitute("root={{root_device}}", &vars(&[])).unwrap_err();
        assert_eq!(err, RenderError::UnresolvedVariable("root_device".to_string()));
    }

    #[test]
    fn unterminated_reference_is_an_error() {
        let err = substitute("root={{root_device", &vars(&[("root_device", "sda")])).unwrap_err();
        assert_eq!(err, RenderError::UnterminatedVariable);
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(substitute("quiet splash", &vars(&[])).unwrap(), "quiet splash");
    }

    #[test]
    fn renders_full_response() {
        let template = ResponseTemplateSpec {
            cmdline: "ip=dhcp hostname={{hostname}}".to_string(),
            message: Some("booting {{hostname}}".to_string()),
            extra_initrds: vec!["default/extra/cloud-init".to_string()],
        };
        let response = render_response(
            &template,
            "default/ubuntu/kernel",
            "default/ubuntu/initrd",
            &vars(&[("hostname", "node-1")]),
        )
        .unwrap();
        assert_eq!(response.kernel, "default/ubuntu/kernel");
        assert_eq!(
            response.initrd,
            vec!["default/ubuntu/initrd", "default/extra/cloud-init"]
        );
        assert_eq!(response.cmdline.as_deref(), Some("ip=dhcp hostname=node-1"));
        assert_eq!(response.message.as_deref(), Some("booting node-1"));
    }

    #[test]
    fn empty_cmdline_is_omitted() {
        let template = ResponseTemplateSpec {
            cmdline: String::new(),
            message: None,
            extra_initrds: Vec::new(),
        };
        let response = render_response(&template, "k", "i", &vars(&[])).unwrap();
        assert_eq!(response.cmdline, None);
    }
}
