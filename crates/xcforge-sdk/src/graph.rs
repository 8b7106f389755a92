//! Target dependency ordering.

use std::collections::{BTreeSet, HashMap};

use crate::types::{BuildError, Dependency, TargetSpec};

/// Orders targets so every dependency builds before its dependents.
///
/// Ties are broken by declaration order, so independent targets build in the
/// order they were configured. Duplicate names, references to unknown
/// targets and cycles are configuration errors; nothing is built when the
/// graph is invalid.
///
/// Each edge is also checked against its provider: a tool edge needs a
/// provider that declares a host tool, and a link edge needs the provider to
/// be built for every pair of the dependent.
pub fn build_order(specs: &[TargetSpec]) -> Result<Vec<&TargetSpec>, BuildError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, spec) in specs.iter().enumerate() {
        if index.insert(spec.name.as_str(), i).is_some() {
            return Err(BuildError::Config(format!(
                "target `{}` is defined more than once",
                spec.name
            )));
        }
    }

    let mut pending = vec![0usize; specs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    for (i, spec) in specs.iter().enumerate() {
        for dep in &spec.dependencies {
            let Some(&d) = index.get(dep.target.as_str()) else {
                return Err(BuildError::Config(format!(
                    "target `{}` depends on unknown target `{}`",
                    spec.name, dep.target
                )));
            };
            if d == i {
                return Err(BuildError::Config(format!(
                    "target `{}` depends on itself",
                    spec.name
                )));
            }
            check_edge(spec, dep, &specs[d])?;
            pending[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(specs.len());
    while let Some(next) = ready.pop_first() {
        order.push(&specs[next]);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != specs.len() {
        let stuck: Vec<&str> = specs
            .iter()
            .enumerate()
            .filter(|(i, _)| pending[*i] > 0)
            .map(|(_, s)| s.name.as_str())
            .collect();
        return Err(BuildError::Config(format!(
            "dependency cycle between targets: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

fn check_edge(
    spec: &TargetSpec,
    dep: &Dependency,
    provider: &TargetSpec,
) -> Result<(), BuildError> {
    if dep.needs_tool() && provider.host_tool.is_none() {
        let handoff = dep
            .tool_flag
            .as_deref()
            .or(dep.tool_env.as_deref())
            .unwrap_or_default();
        return Err(BuildError::Config(format!(
            "target `{}` takes a host tool from `{}` through {}, but `{}` declares no host_tool",
            spec.name, provider.name, handoff, provider.name
        )));
    }
    if dep.link {
        let missing: Vec<String> = spec
            .pairs
            .iter()
            .filter(|pair| !provider.pairs.contains(pair))
            .map(|pair| pair.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::Config(format!(
                "target `{}` links against `{}`, which is not built for {}",
                spec.name,
                provider.name,
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostTool, SourceLocator, TargetPair};
    use std::path::PathBuf;

    fn target(name: &str, deps: &[&str]) -> TargetSpec {
        let mut spec = TargetSpec::new(
            name,
            "1.0",
            SourceLocator::Local {
                path: PathBuf::from(format!("/src/{}", name)),
            },
            format!("lib{}.a", name),
        );
        spec.pairs = vec!["arm64-device".parse().unwrap()];
        spec.dependencies = deps
            .iter()
            .map(|d| Dependency {
                target: d.to_string(),
                tool_flag: None,
                tool_env: None,
                link: true,
            })
            .collect();
        spec
    }

    fn names(order: &[&TargetSpec]) -> Vec<String> {
        order.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_dependency_first() {
        let specs = vec![target("mosh", &["protobuf"]), target("protobuf", &[])];
        assert_eq!(names(&build_order(&specs).unwrap()), ["protobuf", "mosh"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let specs = vec![
            target("zlib", &[]),
            target("app", &["zlib", "ssl"]),
            target("ssl", &[]),
        ];
        assert_eq!(names(&build_order(&specs).unwrap()), ["zlib", "ssl", "app"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let specs = vec![target("mosh", &["protobof"])];
        let err = build_order(&specs).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("protobof"));
    }

    #[test]
    fn test_duplicate_names() {
        let specs = vec![target("protobuf", &[]), target("protobuf", &[])];
        assert!(build_order(&specs).unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_cycle() {
        let specs = vec![
            target("a", &["b"]),
            target("b", &["a"]),
            target("c", &[]),
        ];
        let err = build_order(&specs).unwrap_err().to_string();
        assert!(err.contains("cycle"));
        assert!(err.contains("a, b"));
    }

    fn pairs(names: &[&str]) -> Vec<TargetPair> {
        names.iter().map(|p| p.parse().unwrap()).collect()
    }

    #[test]
    fn test_link_needs_every_pair_of_the_dependent() {
        let mut alpha = target("alpha", &[]);
        alpha.pairs = pairs(&["arm64-device"]);
        let mut beta = target("beta", &["alpha"]);
        beta.pairs = pairs(&["arm64-device", "x86_64-simulator"]);

        let err = build_order(&[alpha.clone(), beta.clone()]).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("x86_64-simulator"));
        assert!(!err.to_string().contains("arm64-device"));

        alpha.pairs = pairs(&["x86_64-simulator", "arm64-device", "arm64-simulator"]);
        assert_eq!(names(&build_order(&[alpha, beta]).unwrap()), ["alpha", "beta"]);
    }

    #[test]
    fn test_unlinked_edge_ignores_pairs() {
        let alpha = target("alpha", &[]);
        let mut beta = target("beta", &["alpha"]);
        beta.pairs = pairs(&["x86_64-simulator"]);
        beta.dependencies[0].link = false;
        assert!(build_order(&[alpha, beta]).is_ok());
    }

    #[test]
    fn test_tool_edge_needs_a_host_tool() {
        let mut gen_target = target("gen", &[]);
        let mut beta = target("beta", &["gen"]);
        beta.dependencies[0].tool_env = Some("GEN".to_string());

        let err = build_order(&[gen_target.clone(), beta.clone()]).unwrap_err();
        let message = err.to_string();
        assert!(err.is_configuration());
        assert!(message.contains("`gen`"));
        assert!(message.contains("GEN"));
        assert!(message.contains("host_tool"));

        gen_target.host_tool = Some(HostTool {
            binary: "gen".to_string(),
            cross_flag: None,
        });
        assert!(build_order(&[gen_target, beta]).is_ok());
    }
}
