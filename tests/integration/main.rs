//! Integration tests for grab

mod concurrency;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use grab::checksum::Digest;
    use grab::config::Config;
    use grab::coordinate::CoordinateKey;
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// An isolated cache, repository and config file
    struct Sandbox {
        temp: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let mut config = Config::default();
            config.general.audit_log = false;
            config.cache.root = Some(temp.path().join("grapes"));
            config.repository.path = temp.path().join("repo");
            std::fs::write(
                temp.path().join("config.toml"),
                toml::to_string_pretty(&config).unwrap(),
            )
            .unwrap();
            Self { temp }
        }

        fn grab(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("grab");
            cmd.env("GRAB_CONFIG", self.config_path())
                .env_remove("GRAB_ROOT")
                .env_remove("GRAB_AUTO_DOWNLOAD");
            cmd
        }

        fn config_path(&self) -> PathBuf {
            self.temp.path().join("config.toml")
        }

        fn cache_root(&self) -> PathBuf {
            self.temp.path().join("grapes")
        }

        /// Put an artifact and its sha256 file into the repository
        fn publish(&self, coordinate: &str, bytes: &[u8], checksum_of: &[u8]) -> PathBuf {
            let key = CoordinateKey::parse(coordinate).unwrap();
            let path = self.temp.path().join("repo").join(key.repository_path());
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, bytes).unwrap();
            std::fs::write(
                format!("{}.sha256", path.display()),
                Digest::sha256(checksum_of).hex,
            )
            .unwrap();
            path
        }
    }

    fn cached_file(root: &Path, coordinate: &str) -> PathBuf {
        root.join(CoordinateKey::parse(coordinate).unwrap().cache_path())
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("grab")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("dependency artifact cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("grab")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("grab"));
    }

    #[test]
    fn config_path() {
        let sandbox = Sandbox::new();
        sandbox
            .grab()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let sandbox = Sandbox::new();
        sandbox
            .grab()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[resolve]"));
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let sandbox = Sandbox::new();
        let before = std::fs::read_to_string(sandbox.config_path()).unwrap();
        sandbox
            .grab()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
        assert_eq!(std::fs::read_to_string(sandbox.config_path()).unwrap(), before);
    }

    #[test]
    fn resolve_downloads_into_cache() {
        let sandbox = Sandbox::new();
        sandbox.publish("com.example:widget:1.0", b"widget jar", b"widget jar");

        let expected = cached_file(&sandbox.cache_root(), "com.example:widget:1.0");
        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("widget-1.0.jar"));

        assert_eq!(std::fs::read(expected).unwrap(), b"widget jar");
    }

    #[test]
    fn resolve_json_reports_origin() {
        let sandbox = Sandbox::new();
        sandbox.publish("com.example:widget:1.0", b"jar", b"jar");

        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"downloaded\""));

        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"cached\""));
    }

    #[test]
    fn resolve_offline_miss_fails() {
        let sandbox = Sandbox::new();
        sandbox.publish("com.example:widget:1.0", b"jar", b"jar");

        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0", "--offline"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Artifact not found"));
    }

    #[test]
    fn resolve_missing_artifact_fails() {
        let sandbox = Sandbox::new();
        sandbox
            .grab()
            .args(["resolve", "com.example:nothing:1.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Artifact not found"));
    }

    #[test]
    fn resolve_checksum_mismatch_fails_unless_disabled() {
        let sandbox = Sandbox::new();
        sandbox.publish("com.example:widget:1.0", b"tampered", b"original");
        let cached = cached_file(&sandbox.cache_root(), "com.example:widget:1.0");

        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Checksum mismatch"));
        assert!(!cached.exists());

        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0", "--no-checksums"])
            .assert()
            .success();
        assert_eq!(std::fs::read(cached).unwrap(), b"tampered");
    }

    #[test]
    fn resolve_invalid_coordinate_fails() {
        let sandbox = Sandbox::new();
        sandbox
            .grab()
            .args(["resolve", "not-a-coordinate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid coordinate"));
    }

    #[test]
    fn cache_list_and_remove() {
        let sandbox = Sandbox::new();
        sandbox.publish("com.example:widget:1.0", b"jar", b"jar");
        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0"])
            .assert()
            .success();

        sandbox
            .grab()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("com.example:widget:1.0@jar"));

        sandbox
            .grab()
            .args(["cache", "remove", "com.example:widget:1.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed"));

        sandbox
            .grab()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached artifacts"));
    }

    #[test]
    fn cache_verify_passes_after_resolve() {
        let sandbox = Sandbox::new();
        sandbox.publish("com.example:widget:1.0", b"jar", b"jar");
        sandbox
            .grab()
            .args(["resolve", "com.example:widget:1.0"])
            .assert()
            .success();

        sandbox.grab().args(["cache", "verify"]).assert().success();
    }

    #[test]
    fn cache_path_honors_root_flag() {
        let sandbox = Sandbox::new();
        let other = sandbox.temp.path().join("elsewhere");
        sandbox
            .grab()
            .args(["cache", "path", "--root"])
            .arg(&other)
            .assert()
            .success()
            .stdout(predicate::str::contains("elsewhere"));
    }

    #[test]
    fn cache_clean_runs_on_empty_cache() {
        let sandbox = Sandbox::new();
        sandbox
            .grab()
            .args(["cache", "clean", "--hours", "0"])
            .assert()
            .success();
    }

    #[test]
    fn completions_generate() {
        cargo_bin_cmd!("grab")
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("grab"));
    }
}
