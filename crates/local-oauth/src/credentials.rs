//! Username/password verification against an htpasswd-style credential file.
//!
//! Each line is `username:hash`. Accepted hash schemes are bcrypt (`$2a$`,
//! `$2b$`, `$2y$`), Apache MD5 (`$apr1$`) and Argon2 PHC strings, so files
//! written by Apache `htpasswd -B` or `htpasswd -m` work unchanged. New
//! hashes are Argon2id. Blank lines and `#` comments are ignored. The file is
//! re-read on every verification so it can be edited without restarting the
//! server.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use async_trait::async_trait;
use md5::{Digest, Md5};
use subtle::ConstantTimeEq;
use tokio::io::AsyncWriteExt;

use crate::error::CredentialError;

/// Checked instead of a real hash when the user does not exist, so unknown
/// users cost the same as wrong passwords.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("local-oauth-dummy-password").ok());

/// Verifies a username/password pair.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + std::fmt::Debug {
    /// Returns true only if the pair is valid. Every failure is `false`.
    async fn verify(&self, username: &str, password: &str) -> bool;
}

/// Credential file on disk.
#[derive(Debug, Clone)]
pub struct HtpasswdFile {
    path: PathBuf,
}

impl HtpasswdFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with one user and a generated password if it does not
    /// exist. Returns the generated password when the file was created.
    pub async fn bootstrap_if_missing(
        &self,
        username: &str,
    ) -> Result<Option<String>, CredentialError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }

        let password = generate_password();
        let line = credential_line(username, &password)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let io_err = |source| CredentialError::Io { path: self.path.clone(), source };
        let mut file = match options.open(&self.path).await {
            Ok(file) => file,
            // Someone else created it in the meantime
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(format!("{line}\n").as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;

        Ok(Some(password))
    }
}

#[async_trait]
impl CredentialVerifier for HtpasswdFile {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let stored = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => lookup(&contents, username).map(str::to_owned),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Credential file unreadable");
                None
            }
        };

        let password = password.to_owned();
        tokio::task::spawn_blocking(move || match stored {
            Some(hash) => check(&hash, &password),
            None => {
                if let Some(dummy) = DUMMY_HASH.as_deref() {
                    let _ = check(dummy, &password);
                }
                false
            }
        })
        .await
        .unwrap_or(false)
    }
}

/// Hash a password with the default Argon2id parameters.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    hash_password_with(password, Params::default())
}

/// Hash a password with explicit Argon2id parameters.
pub fn hash_password_with(password: &str, params: Params) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}

/// Build a `username:hash` line for the credential file.
pub fn credential_line(username: &str, password: &str) -> Result<String, CredentialError> {
    if username.is_empty() || username.contains([':', '\n', '\r']) || username.starts_with('#') {
        return Err(CredentialError::InvalidUsername(username.to_string()));
    }
    Ok(format!("{username}:{}", hash_password(password)?))
}

/// Random password for bootstrapped credential files.
#[must_use]
pub fn generate_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn lookup<'a>(contents: &'a str, username: &str) -> Option<&'a str> {
    if username.is_empty() {
        return None;
    }
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .find(|(user, _)| *user == username)
        .map(|(_, hash)| hash.trim())
}

/// Verify a password against a stored hash, dispatching on the scheme prefix.
/// Unknown schemes and malformed hashes never verify.
fn check(hash: &str, password: &str) -> bool {
    if hash.starts_with("$2") {
        bcrypt::verify(password, hash).unwrap_or(false)
    } else if let Some(rest) = hash.strip_prefix(APR1_MAGIC) {
        rest.split_once('$').is_some_and(|(salt, _)| {
            let computed = apr1_md5(password.as_bytes(), salt.as_bytes());
            computed.as_bytes().ct_eq(hash.as_bytes()).into()
        })
    } else if hash.starts_with("$argon2") {
        PasswordHash::new(hash).is_ok_and(|parsed| {
            Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
        })
    } else {
        false
    }
}

const APR1_MAGIC: &str = "$apr1$";

const CRYPT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Apache's MD5-crypt variant, as written by `htpasswd -m`.
fn apr1_md5(password: &[u8], salt: &[u8]) -> String {
    let salt = &salt[..salt.len().min(8)];

    let alternate = Md5::new()
        .chain_update(password)
        .chain_update(salt)
        .chain_update(password)
        .finalize();

    let mut ctx = Md5::new();
    ctx.update(password);
    ctx.update(APR1_MAGIC.as_bytes());
    ctx.update(salt);
    for chunk in password.chunks(16) {
        ctx.update(&alternate[..chunk.len()]);
    }
    let mut len = password.len();
    while len > 0 {
        if len & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&password[..1]);
        }
        len >>= 1;
    }
    let mut digest = ctx.finalize();

    for round in 0..1000 {
        let mut ctx = Md5::new();
        if round % 2 == 1 {
            ctx.update(password);
        } else {
            ctx.update(digest.as_slice());
        }
        if round % 3 != 0 {
            ctx.update(salt);
        }
        if round % 7 != 0 {
            ctx.update(password);
        }
        if round % 2 == 1 {
            ctx.update(digest.as_slice());
        } else {
            ctx.update(password);
        }
        digest = ctx.finalize();
    }

    let mut encoded = String::with_capacity(22);
    for [a, b, c] in [[0, 6, 12], [1, 7, 13], [2, 8, 14], [3, 9, 15], [4, 10, 5]] {
        let group =
            (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_crypt64(&mut encoded, group, 4);
    }
    push_crypt64(&mut encoded, u32::from(digest[11]), 2);

    format!("{APR1_MAGIC}{}${encoded}", String::from_utf8_lossy(salt))
}

fn push_crypt64(out: &mut String, mut value: u32, chars: usize) {
    for _ in 0..chars {
        out.push(char::from(CRYPT_ALPHABET[(value & 0x3f) as usize]));
        value >>= 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hash(password: &str) -> String {
        hash_password_with(password, Params::new(1024, 1, 1, None).unwrap()).unwrap()
    }

    #[test]
    fn test_lookup_skips_comments_and_blanks() {
        let contents = "# operators\n\nalice:$argon2id$a\n  bob:$argon2id$b  \n";
        assert_eq!(lookup(contents, "alice"), Some("$argon2id$a"));
        assert_eq!(lookup(contents, "bob"), Some("$argon2id$b"));
        assert_eq!(lookup(contents, "# operators"), None);
        assert_eq!(lookup(contents, "carol"), None);
        assert_eq!(lookup(contents, ""), None);
    }

    #[test]
    fn test_check_hash() {
        let hash = fast_hash("testpass");
        assert!(check(&hash, "testpass"));
        assert!(!check(&hash, "wrongpass"));
        assert!(!check("not-a-phc-string", "testpass"));
    }

    #[test]
    fn test_check_bcrypt_lines() {
        // Produced by libcrypt / Apache `htpasswd -B`
        let b2b = "$2b$05$W16dPq3nTiWPAn1/zXhLNenpj0moWii4/nRab0ZgzR0OyIrOU4boS";
        let b2y = "$2y$05$abcdefghijklmnopqrstuujbcR1uSBSxfvCe.nADugaz.EBxzTUKy";
        for hash in [b2b, b2y] {
            assert!(check(hash, "correctpass"), "{hash}");
            assert!(!check(hash, "wrongpass"), "{hash}");
        }
        assert!(!check("$2b$05$truncated", "correctpass"));
    }

    #[test]
    fn test_check_apr1_lines() {
        // Produced by `openssl passwd -apr1`
        assert!(check("$apr1$abcdefgh$6qUpcaVHAqEv29x2h/g6u.", "correctpass"));
        assert!(!check("$apr1$abcdefgh$6qUpcaVHAqEv29x2h/g6u.", "wrongpass"));
        assert!(check("$apr1$xy$43..WIhbfuznGvwoCyUek/", ""));
        assert!(check(
            "$apr1$Zz9./Q$B5tmQmWZFEzoCgOkpN4HO1",
            "a much longer password over sixteen bytes!"
        ));
        assert!(!check("$apr1$nodollar", "correctpass"));
    }

    #[test]
    fn test_check_unknown_scheme_never_verifies() {
        assert!(!check("correctpass", "correctpass"));
        assert!(!check("{SHA}3f8Q2XeYq9vzEVf7vY8aHf6bV1M=", "correctpass"));
        assert!(!check("", ""));
    }

    #[test]
    fn test_credential_line_rejects_bad_usernames() {
        assert!(credential_line("", "pw").is_err());
        assert!(credential_line("a:b", "pw").is_err());
        assert!(credential_line("#admin", "pw").is_err());
    }

    #[test]
    fn test_generated_passwords_are_unique() {
        let passwords: std::collections::HashSet<_> = (0..100).map(|_| generate_password()).collect();
        assert_eq!(passwords.len(), 100);
    }

    #[tokio::test]
    async fn test_verify_user_with_valid_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".htpasswd");
        std::fs::write(&path, format!("testuser:{}\n", fast_hash("testpass"))).unwrap();

        let file = HtpasswdFile::new(&path);
        assert!(file.verify("testuser", "testpass").await);
        assert!(!file.verify("testuser", "wrongpass").await);
        assert!(!file.verify("wronguser", "testpass").await);
    }

    #[tokio::test]
    async fn test_verify_apache_htpasswd_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".htpasswd");
        std::fs::write(
            &path,
            "admin:$2b$05$W16dPq3nTiWPAn1/zXhLNenpj0moWii4/nRab0ZgzR0OyIrOU4boS\n\
             ops:$apr1$abcdefgh$6qUpcaVHAqEv29x2h/g6u.\n",
        )
        .unwrap();

        let file = HtpasswdFile::new(&path);
        assert!(file.verify("admin", "correctpass").await);
        assert!(file.verify("ops", "correctpass").await);
        assert!(!file.verify("admin", "wrongpass").await);
        assert!(!file.verify("ops", "wrongpass").await);
    }

    #[tokio::test]
    async fn test_verify_missing_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let file = HtpasswdFile::new(dir.path().join("missing"));
        assert!(!file.verify("admin", "anything").await);
    }

    #[tokio::test]
    async fn test_verify_sees_live_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".htpasswd");
        std::fs::write(&path, format!("admin:{}\n", fast_hash("old"))).unwrap();
        let file = HtpasswdFile::new(&path);
        assert!(file.verify("admin", "old").await);

        std::fs::write(&path, format!("admin:{}\n", fast_hash("new"))).unwrap();
        assert!(!file.verify("admin", "old").await);
        assert!(file.verify("admin", "new").await);
    }

    #[tokio::test]
    async fn test_bootstrap_creates_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = HtpasswdFile::new(dir.path().join(".htpasswd"));

        let password = file.bootstrap_if_missing("admin").await.unwrap().unwrap();
        assert!(file.verify("admin", &password).await);

        // Existing file is left alone
        assert!(file.bootstrap_if_missing("admin").await.unwrap().is_none());
        assert!(file.verify("admin", &password).await);
    }
}
