//! `meta-data`: instance-id is the SHA1 digest of `user-data ∥
//! network-config`, so any change to either regenerates the instance id
//! and forces cloud-init to re-run on next boot.

/// Build `meta-data` for the nocloud/configdrive2 formats.
pub fn build_meta_data(name: &str, user_data: &str, network_config: &str) -> String {
    let mut digest_input = user_data.to_string();
    digest_input.push_str(network_config);
    let instance_id = util::digest::sha1_hex(digest_input.as_bytes());
    format!("instance-id: {}\nlocal-hostname: {}\n", instance_id, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_changes_with_content() {
        let a = build_meta_data("vm100", "user-data-a", "net-a");
        let b = build_meta_data("vm100", "user-data-b", "net-a");
        assert_ne!(a, b);
    }

    #[test]
    fn test_stable_for_same_content() {
        let a = build_meta_data("vm100", "user-data", "net");
        let b = build_meta_data("vm100", "user-data", "net");
        assert_eq!(a, b);
    }
}
