//! `user-data`: a `#cloud-config` YAML document built from the reserved
//! `ciuser`/`cipassword`/`sshkeys`/`ciupgrade` config keys.

use config::Config;

/// URL-decode `sshkeys` (one key per line, `%XX`-escaped) into the literal
/// keys cloud-init expects.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Build the `#cloud-config` document. `name` is the VM's node name, used
/// as both hostname and fqdn when no explicit `searchdomain` is set.
pub fn build_user_data(config: &Config, name: &str) -> String {
    let mut out = String::from("#cloud-config\n");

    let hostname = config.get("name").unwrap_or(name);
    out.push_str(&format!("hostname: {}\n", hostname));
    if let Some(domain) = config.get("searchdomain") {
        out.push_str(&format!("fqdn: {}.{}\n", hostname, domain));
    }
    out.push_str("manage_etc_hosts: true\n");

    if let Some(user) = config.get("ciuser") {
        out.push_str(&format!("user: {}\n", user));
    }
    if let Some(password) = config.get("cipassword") {
        out.push_str(&format!("password: {}\n", password));
        out.push_str("chpasswd:\n  expire: False\n");
    }

    if let Some(sshkeys) = config.get("sshkeys") {
        out.push_str("ssh_authorized_keys:\n");
        for line in url_decode(sshkeys).lines().filter(|l| !l.is_empty()) {
            out.push_str(&format!("  - {}\n", line));
        }
    }

    let upgrade = config.get("ciupgrade") != Some("0");
    out.push_str(&format!("package_upgrade: {}\n", upgrade));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_user_data() {
        let config = Config::new();
        let out = build_user_data(&config, "vm100");
        assert!(out.starts_with("#cloud-config\n"));
        assert!(out.contains("hostname: vm100\n"));
        assert!(out.contains("package_upgrade: true\n"));
    }

    #[test]
    fn test_upgrade_disabled() {
        let mut config = Config::new();
        config.set("ciupgrade", "0");
        let out = build_user_data(&config, "vm100");
        assert!(out.contains("package_upgrade: false\n"));
    }

    #[test]
    fn test_sshkeys_url_decoded() {
        let mut config = Config::new();
        config.set("sshkeys", "ssh-rsa%20AAAA...%20user%40host");
        let out = build_user_data(&config, "vm100");
        assert!(out.contains("- ssh-rsa AAAA... user@host\n"));
    }

    #[test]
    fn test_password_sets_no_expiry() {
        let mut config = Config::new();
        config.set("cipassword", "hunter2");
        let out = build_user_data(&config, "vm100");
        assert!(out.contains("password: hunter2\n"));
        assert!(out.contains("expire: False\n"));
    }
}
