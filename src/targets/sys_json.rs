//! Built-in target descriptions.
/// linux/amd64
const LINUX_AMD64: &str = include_str!("sys/linux_amd64.json");
/// test/64, small target for testing.
const TEST_64: &str = include_str!("sys/test_64.json");

pub const TARGETS: [(&str, &str); 2] = [("linux/amd64", LINUX_AMD64), ("test/64", TEST_64)];

pub fn load<T: AsRef<str>>(target: T) -> Option<&'static str> {
    let target = target.as_ref();
    TARGETS
        .iter()
        .copied()
        .find(|t| t.0 == target)
        .map(|(_, desc)| desc)
}

pub fn supported() -> Vec<&'static str> {
    TARGETS.iter().copied().map(|(t, _)| t).collect()
}
