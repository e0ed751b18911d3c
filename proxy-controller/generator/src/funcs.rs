use anyhow::{anyhow, bail, Result};
use caddy_proxy_controller_core::template::Funcs;
use serde_json::Value;

/// The proxy targets of a workload, or why they could not be resolved.
pub(crate) type Targets = std::result::Result<Vec<String>, String>;

/// Builds the functions available to label templates:
///
/// - `upstreams` renders the workload's targets, space separated. A string
///   argument prefixes each target with a scheme and an integer argument
///   appends a port: `{{upstreams https 8443}}`.
/// - `http`, `https` and `h2c` name schemes.
/// - `domain` renders each host followed by its local-domain qualified name.
pub(crate) fn template_funcs(targets: Targets, local_domain: Option<String>) -> Funcs {
    Funcs::new()
        .with("upstreams", move |args| upstreams(&targets, args))
        .with("http", |_| Ok(Value::from("http")))
        .with("https", |_| Ok(Value::from("https")))
        .with("h2c", |_| Ok(Value::from("h2c")))
        .with("domain", move |args| domain(local_domain.as_deref(), args))
}

fn upstreams(targets: &Targets, args: &[Value]) -> Result<Value> {
    let targets = targets.as_ref().map_err(|e| anyhow!("{e}"))?;
    let decorated = targets
        .iter()
        .map(|target| {
            let mut target = target.clone();
            for arg in args {
                match arg {
                    Value::String(scheme) => target = format!("{scheme}://{target}"),
                    Value::Number(port) if port.is_u64() => target = format!("{target}:{port}"),
                    other => bail!("invalid upstreams argument {other}"),
                }
            }
            Ok(target)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::from(decorated.join(" ")))
}

fn domain(local_domain: Option<&str>, args: &[Value]) -> Result<Value> {
    let local_domain = local_domain
        .filter(|d| !d.is_empty())
        .ok_or_else(|| anyhow!("no local domain configured"))?;
    let hosts = args
        .iter()
        .map(|arg| {
            let host = match arg {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => bail!("invalid host {other}"),
            };
            Ok(format!("{host} {host}.{local_domain}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::from(hosts.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddy_proxy_controller_core::template::render;
    use serde_json::json;

    fn funcs() -> Funcs {
        template_funcs(
            Ok(vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()]),
            Some("home.arpa".to_string()),
        )
    }

    #[test]
    fn renders_upstreams() {
        let data = json!({});
        assert_eq!(
            render("{{upstreams}}", &data, &funcs()).unwrap(),
            "10.0.0.2 10.0.0.3"
        );
        assert_eq!(
            render("{{upstreams 8080}}", &data, &funcs()).unwrap(),
            "10.0.0.2:8080 10.0.0.3:8080"
        );
        assert_eq!(
            render("{{upstreams https 8443}}", &data, &funcs()).unwrap(),
            "https://10.0.0.2:8443 https://10.0.0.3:8443"
        );
        assert_eq!(
            render(r#"{{upstreams "h2c"}}"#, &data, &funcs()).unwrap(),
            "h2c://10.0.0.2 h2c://10.0.0.3"
        );
    }

    #[test]
    fn unresolved_upstreams_fail() {
        let funcs = template_funcs(Err("no tasks".to_string()), None);
        assert!(render("{{upstreams 80}}", &json!({}), &funcs).is_err());
    }

    #[test]
    fn renders_domains() {
        assert_eq!(
            render("{{domain \"web\" \"api\"}}", &json!({}), &funcs()).unwrap(),
            "web web.home.arpa api api.home.arpa"
        );
        let funcs = template_funcs(Ok(vec![]), None);
        assert!(render("{{domain \"web\"}}", &json!({}), &funcs).is_err());
    }
}
