//! Reference suite for the `debian-9-nginx` image.

use crate::check::{Check, TestCase};

/// Log lines the image's entrypoint hooks print on a healthy start.
pub const EXPECTED_LOG_LINES: [&str; 7] = [
    "run-parts: executing /hooks/entrypoint-pre.d/00_check_euid",
    "run-parts: executing /hooks/entrypoint-pre.d/01_ssmtp_setup",
    "run-parts: executing /hooks/entrypoint-pre.d/02_user_group_setup",
    "run-parts: executing /hooks/entrypoint-pre.d/19_doc_root_setup",
    "run-parts: executing /hooks/entrypoint-pre.d/20_ssl_setup",
    "run-parts: executing /hooks/supervisord-pre.d/21_cleanup_log_files",
    "Loading nginx config",
];

/// Page injected during setup; its title is `Success`.
pub const TEST_PAGE: &str = "/test.html";

pub const FORWARDED_FOR: &str = "1.2.3.4";
pub const FORWARDED_PORT: u16 = 99;

pub fn debian9_nginx() -> Vec<TestCase> {
    vec![
        TestCase::new("docker_logs", Check::logs_contain(EXPECTED_LOG_LINES)),
        TestCase::new(
            "nginx_conf",
            Check::file_contains("/etc/nginx/nginx.conf", ["daemon off;"]),
        ),
        TestCase::new(
            "nginx_site_conf",
            Check::file_contains(
                "/etc/nginx/sites-enabled/site.conf",
                ["listen 8080", "listen [::]:8080"],
            ),
        ),
        TestCase::new(
            "nginx_var_log_nginx",
            Check::file_mode("/var/log/nginx", "drwxrwxrwx"),
        ),
        TestCase::new(
            "nginx_var_lib_nginx",
            Check::file_mode("/var/lib/nginx", "drwxrwxrwx"),
        ),
        TestCase::new(
            "nginx_var_www_html",
            Check::file_mode("/var/www/html", "drwxrwxrwx"),
        ),
        TestCase::new("nginx_installed", Check::package_installed("nginx")),
        // A bare "-" is enough to prove it exists and is a regular file.
        TestCase::new(
            "nginx_pid_file",
            Check::file_mode("/var/run/nginx.pid", "-"),
        ),
        TestCase::new("nginx_get", Check::page_title(TEST_PAGE, "Success")),
        TestCase::new(
            "nginx_cgi_headers",
            Check::forwarded_headers_logged(TEST_PAGE, FORWARDED_FOR, FORWARDED_PORT),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_case_names_in_order() {
        let names: Vec<_> = debian9_nginx().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "docker_logs",
                "nginx_conf",
                "nginx_site_conf",
                "nginx_var_log_nginx",
                "nginx_var_lib_nginx",
                "nginx_var_www_html",
                "nginx_installed",
                "nginx_pid_file",
                "nginx_get",
                "nginx_cgi_headers",
            ]
        );
    }

    #[test]
    fn test_case_names_unique() {
        let suite = debian9_nginx();
        let unique: HashSet<_> = suite.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(unique.len(), suite.len());
    }

    #[test]
    fn test_logs_case_expects_all_hook_lines() {
        let suite = debian9_nginx();
        let Check::LogsContain { expected } = &suite[0].check else {
            panic!("first case should check logs");
        };
        assert_eq!(expected.len(), 7);
        assert_eq!(expected.last().map(String::as_str), Some("Loading nginx config"));
    }

    #[test]
    fn test_header_case_uses_forwarding_headers() {
        let suite = debian9_nginx();
        let Check::HeadersLogged { probe, needle, .. } = &suite[9].check else {
            panic!("last case should check forwarded headers");
        };
        assert_eq!(needle, "1.2.3.4");
        assert!(
            probe
                .headers
                .contains(&("X-Forwarded-Port".to_string(), "99".to_string()))
        );
    }
}
