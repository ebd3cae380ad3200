//! Pairing of host-declared tests with the tests found on the devices.

use std::collections::BTreeMap;

use crate::suite::{HostFn, TestDecl};

/// A test of a suite variant, ready to run.
#[derive(Clone)]
pub struct PlannedTest {
    pub title: String,
    /// Name of the on-device counterpart
    pub device_test: Option<String>,
    /// Indices of the variant's devices running `device_test`
    pub devices: Vec<usize>,
    pub body: Option<HostFn>,
}

impl PlannedTest {
    /// The test only runs on the host.
    pub fn is_host_only(&self) -> bool {
        self.devices.is_empty()
    }
}

impl std::fmt::Debug for PlannedTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedTest")
            .field("title", &self.title)
            .field("device_test", &self.device_test)
            .field("devices", &self.devices)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// Find the on-device test for the host test `title`.
///
/// Tried in order, the first hit wins: the title as is, with non-identifier characters replaced
/// by underscores, with runs of underscores collapsed and trimmed, then lower-cased.
pub fn find_test_name<V>(device_tests: &BTreeMap<String, V>, title: &str) -> Option<String> {
    if device_tests.contains_key(title) {
        return Some(title.to_string());
    }

    let name: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if device_tests.contains_key(&name) {
        return Some(name);
    }

    let name = name
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if device_tests.contains_key(&name) {
        return Some(name);
    }

    let name = name.to_lowercase();
    device_tests.contains_key(&name).then_some(name)
}

/// Pair `tests` with `device_tests`, a map from on-device test names to the devices running them.
///
/// On-device tests without a host counterpart are appended in name order.
pub fn correlate(tests: &[TestDecl], device_tests: &BTreeMap<String, Vec<usize>>) -> Vec<PlannedTest> {
    let mut remaining = device_tests.clone();

    let mut planned: Vec<PlannedTest> = tests
        .iter()
        .map(|t| {
            let device_test = find_test_name(device_tests, &t.title);
            let devices = device_test
                .as_ref()
                .map(|name| {
                    remaining.remove(name);
                    device_tests.get(name).cloned().unwrap_or_default()
                })
                .unwrap_or_default();

            PlannedTest {
                title: t.title.clone(),
                device_test,
                devices,
                body: t.body.clone(),
            }
        })
        .collect();

    planned.extend(remaining.into_iter().map(|(name, devices)| PlannedTest {
        title: name.clone(),
        device_test: Some(name),
        devices,
        body: None,
    }));

    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_tests(names: &[&str]) -> BTreeMap<String, Vec<usize>> {
        names.iter().map(|n| (n.to_string(), vec![0])).collect()
    }

    fn decl(title: &str) -> TestDecl {
        TestDecl {
            title: title.to_string(),
            body: None,
        }
    }

    #[test]
    fn normalization() {
        let tests = device_tests(&["test_one"]);
        for title in ["test_one", "Test One", "test one", "TEST_ONE", " Test -- One! "] {
            assert_eq!(
                find_test_name(&tests, title).as_deref(),
                Some("test_one"),
                "{title}"
            );
        }
        assert_eq!(find_test_name(&tests, "test two"), None);
        assert_eq!(find_test_name(&tests, "testone"), None);
    }

    #[test]
    fn exact_match_wins() {
        let tests = device_tests(&["Test_One", "test_one"]);
        assert_eq!(find_test_name(&tests, "Test One").as_deref(), Some("Test_One"));
        assert_eq!(find_test_name(&tests, "test One").as_deref(), Some("test_one"));
    }

    #[test]
    fn device_only_tests_are_appended() {
        let mut devs = device_tests(&["zeta", "alpha", "i2c_master_slave"]);
        devs.insert("i2c_master_slave".to_string(), vec![0, 1]);

        let planned = correlate(&[decl("I2C Master Slave"), decl("host only")], &devs);
        let titles: Vec<&str> = planned.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["I2C Master Slave", "host only", "alpha", "zeta"]);

        assert_eq!(planned[0].device_test.as_deref(), Some("i2c_master_slave"));
        assert_eq!(planned[0].devices, [0, 1]);
        assert!(planned[1].is_host_only());
        assert_eq!(planned[2].device_test.as_deref(), Some("alpha"));
    }
}
