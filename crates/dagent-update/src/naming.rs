//! Unused container name probing

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;

/// Find a container name not in use, starting with `base`
///
/// Probes `base`, then `base1`, `base2`, ... by exact-name lookup and
/// returns the first one no container holds. Assumes no one else renames
/// containers while probing.
///
/// # Errors
/// Propagates the first failed lookup.
pub async fn unique_container_name(
    runtime: &dyn ContainerRuntime,
    base: &str,
) -> Result<String, RuntimeError> {
    let mut name = base.to_string();
    let mut count: u64 = 0;

    while let Some(holder) = runtime.find_container_by_name(&name).await? {
        tracing::debug!("Name {} taken by {}", name, holder);
        count += 1;
        name = format!("{base}{count}");
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockContainerRuntime;
    use crate::types::ContainerId;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn runtime_with(taken: HashSet<String>) -> MockContainerRuntime {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_find_container_by_name()
            .returning(move |name| Ok(taken.contains(name).then(|| ContainerId::from(name))));
        runtime
    }

    #[tokio::test]
    async fn unused_base_returned_as_is() {
        let runtime = runtime_with(HashSet::new());
        let name = unique_container_name(&runtime, "agent-update").await.unwrap();
        assert_eq!(name, "agent-update");
    }

    #[tokio::test]
    async fn lookup_error_propagates() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_find_container_by_name()
            .returning(|_| Err(RuntimeError::Request("socket closed".to_string())));

        let err = unique_container_name(&runtime, "agent").await.unwrap_err();
        assert_eq!(err, RuntimeError::Request("socket closed".to_string()));
    }

    proptest! {
        #[test]
        fn smallest_free_suffix(taken_prefix in 0usize..6) {
            let base = "agent-update";
            let mut taken = HashSet::new();
            for i in 0..taken_prefix {
                taken.insert(if i == 0 { base.to_string() } else { format!("{base}{i}") });
            }
            let expected = if taken_prefix == 0 {
                base.to_string()
            } else {
                format!("{base}{taken_prefix}")
            };

            let runtime = runtime_with(taken);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let name = rt.block_on(unique_container_name(&runtime, base)).unwrap();
            prop_assert_eq!(name, expected);
        }
    }
}
