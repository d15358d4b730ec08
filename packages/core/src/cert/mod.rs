//! TLS certificate generation and checks
//!
//! A CA and a client certificate are created once in the shared certs
//! directory. Each provisioning run issues a fresh server certificate signed
//! by that CA, with the machine's current address in its SANs.

use std::cmp::Ordering;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509NameBuilder};
use thiserror::Error;

use crate::auth::AuthOptions;

pub const DEFAULT_BITS: u32 = 2048;
const VALIDITY_DAYS: u32 = 1080;

#[derive(Error, Debug)]
pub enum CertError {
    #[error("OpenSSL error: {0}")]
    Openssl(#[from] ErrorStack),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CA certificate not found at {0}; run regenerate-certs to create it")]
    MissingCa(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CertError + '_ {
    move |source| CertError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parameters for a CA-signed certificate
#[derive(Debug, Clone)]
pub struct CertOptions {
    /// SAN entries; empty means a client certificate
    pub hosts: Vec<String>,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: PathBuf,
    pub ca_key_file: PathBuf,
    pub org: String,
    pub bits: u32,
}

fn new_key(bits: u32) -> Result<PKey<Private>, CertError> {
    Ok(PKey::from_rsa(Rsa::generate(bits)?)?)
}

fn serial_number() -> Result<openssl::asn1::Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}

fn subject(org: &str) -> Result<openssl::x509::X509Name, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("O", org)?;
    Ok(name.build())
}

fn write_pem(cert_file: &Path, cert: &X509, key_file: &Path, key: &PKey<Private>) -> Result<(), CertError> {
    for path in [cert_file, key_file] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }
    fs::write(cert_file, cert.to_pem()?).map_err(io_err(cert_file))?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(key_file)
        .map_err(io_err(key_file))?;
    file.write_all(&key.rsa()?.private_key_to_pem()?)
        .map_err(io_err(key_file))?;
    Ok(())
}

/// Create a self-signed CA certificate and key
pub fn generate_ca_certificate(
    cert_file: &Path,
    key_file: &Path,
    org: &str,
    bits: u32,
) -> Result<(), CertError> {
    tracing::info!("Creating CA: {}", cert_file.display());
    let key = new_key(bits)?;
    let name = subject(org)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*serial_number()?)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;
    builder.sign(&key, MessageDigest::sha256())?;

    write_pem(cert_file, &builder.build(), key_file, &key)
}

/// Create a certificate signed by the CA in `opts`
///
/// With hosts this is a server certificate carrying them as SANs (IP entries
/// for addresses, DNS entries otherwise); without hosts it is a client
/// certificate.
pub fn generate_cert(opts: &CertOptions) -> Result<(), CertError> {
    if !opts.ca_file.exists() {
        return Err(CertError::MissingCa(opts.ca_file.clone()));
    }
    let ca_cert = X509::from_pem(&fs::read(&opts.ca_file).map_err(io_err(&opts.ca_file))?)?;
    let ca_key =
        PKey::private_key_from_pem(&fs::read(&opts.ca_key_file).map_err(io_err(&opts.ca_key_file))?)?;
    let key = new_key(opts.bits)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*serial_number()?)?;
    builder.set_subject_name(&*subject(&opts.org)?)?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
    builder.append_extension(BasicConstraints::new().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .key_agreement()
            .build()?,
    )?;

    if opts.hosts.is_empty() {
        builder.append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;
    } else {
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
        let mut san = SubjectAlternativeName::new();
        for host in &opts.hosts {
            if host.parse::<IpAddr>().is_ok() {
                san.ip(host);
            } else {
                san.dns(host);
            }
        }
        let san = san.build(&builder.x509v3_context(Some(&ca_cert), None))?;
        builder.append_extension(san)?;
    }

    builder.sign(&ca_key, MessageDigest::sha256())?;
    write_pem(&opts.cert_file, &builder.build(), &opts.key_file, &key)
}

/// Ensure the CA and client certificates exist
///
/// Existing material is left alone unless `regenerate` is set. A fresh CA
/// always brings a fresh client certificate with it.
pub fn bootstrap_certificates(auth: &AuthOptions, regenerate: bool) -> Result<(), CertError> {
    fs::create_dir_all(&auth.cert_dir).map_err(io_err(&auth.cert_dir))?;
    let org = whoami::username();

    let mut new_ca = false;
    if regenerate || !auth.ca_cert_path.exists() || !auth.ca_private_key_path.exists() {
        generate_ca_certificate(&auth.ca_cert_path, &auth.ca_private_key_path, &org, DEFAULT_BITS)?;
        new_ca = true;
    }

    if new_ca || !auth.client_cert_path.exists() || !auth.client_key_path.exists() {
        tracing::info!("Creating client certificate: {}", auth.client_cert_path.display());
        generate_cert(&CertOptions {
            hosts: Vec::new(),
            cert_file: auth.client_cert_path.clone(),
            key_file: auth.client_key_path.clone(),
            ca_file: auth.ca_cert_path.clone(),
            ca_key_file: auth.ca_private_key_path.clone(),
            org,
            bits: DEFAULT_BITS,
        })?;
    }
    Ok(())
}

/// SAN entries of a PEM certificate, IPs rendered in their usual text form
pub fn read_sans(cert_file: &Path) -> Result<Vec<String>, CertError> {
    let cert = X509::from_pem(&fs::read(cert_file).map_err(io_err(cert_file))?)?;
    let Some(names) = cert.subject_alt_names() else {
        return Ok(Vec::new());
    };
    Ok(names
        .iter()
        .filter_map(|name| {
            name.dnsname()
                .map(str::to_string)
                .or_else(|| name.ipaddress().and_then(ip_from_bytes).map(|ip| ip.to_string()))
        })
        .collect())
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Check the host's server certificate against its CA and address
///
/// Valid means: signed by the CA, not expired, and `addr` (a host or
/// `host:port`) listed in the SANs.
pub fn validate_certificate(addr: &str, auth: &AuthOptions) -> Result<bool, CertError> {
    let ca = X509::from_pem(&fs::read(&auth.ca_cert_path).map_err(io_err(&auth.ca_cert_path))?)?;
    let server = X509::from_pem(
        &fs::read(&auth.server_cert_path).map_err(io_err(&auth.server_cert_path))?,
    )?;

    if !server.verify(&*ca.public_key()?)? {
        tracing::debug!("Server certificate is not signed by the CA");
        return Ok(false);
    }

    let now = Asn1Time::days_from_now(0)?;
    if server.not_after().compare(&now)? == Ordering::Less {
        tracing::debug!("Server certificate expired");
        return Ok(false);
    }

    let host = crate::drivers::host_from_url(addr).unwrap_or_else(|| addr.to_string());
    let sans = read_sans(&auth.server_cert_path)?;
    Ok(sans.iter().any(|san| san == &host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn auth(temp: &TempDir) -> AuthOptions {
        AuthOptions::for_host(&temp.path().join("certs"), &temp.path().join("machines/vm1"))
    }

    fn issue_server(auth: &AuthOptions, hosts: &[&str]) {
        generate_cert(&CertOptions {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            cert_file: auth.server_cert_path.clone(),
            key_file: auth.server_key_path.clone(),
            ca_file: auth.ca_cert_path.clone(),
            ca_key_file: auth.ca_private_key_path.clone(),
            org: "tester.vm1".to_string(),
            bits: DEFAULT_BITS,
        })
        .unwrap();
    }

    #[test]
    fn test_bootstrap_creates_ca_and_client() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        assert!(auth.ca_cert_path.exists());
        assert!(auth.ca_private_key_path.exists());
        assert!(auth.client_cert_path.exists());
        assert!(auth.client_key_path.exists());
    }

    #[test]
    fn test_bootstrap_keeps_existing_material() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        let before = fs::read(&auth.ca_cert_path).unwrap();

        bootstrap_certificates(&auth, false).unwrap();
        assert_eq!(fs::read(&auth.ca_cert_path).unwrap(), before);

        bootstrap_certificates(&auth, true).unwrap();
        assert_ne!(fs::read(&auth.ca_cert_path).unwrap(), before);
    }

    #[test]
    fn test_server_cert_sans() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        issue_server(&auth, &["vm1.example.com", "192.168.64.5", "localhost"]);

        let sans = read_sans(&auth.server_cert_path).unwrap();
        assert!(sans.contains(&"vm1.example.com".to_string()));
        assert!(sans.contains(&"192.168.64.5".to_string()));
        assert!(sans.contains(&"localhost".to_string()));
    }

    #[test]
    fn test_client_cert_has_no_sans() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        assert!(read_sans(&auth.client_cert_path).unwrap().is_empty());
    }

    #[test]
    fn test_validate_certificate() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        issue_server(&auth, &["192.168.64.5", "localhost"]);

        assert!(validate_certificate("tcp://192.168.64.5:2376", &auth).unwrap());
        assert!(validate_certificate("192.168.64.5", &auth).unwrap());
        assert!(!validate_certificate("tcp://10.9.9.9:2376", &auth).unwrap());
    }

    #[test]
    fn test_validate_fails_after_ca_regenerated() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        issue_server(&auth, &["192.168.64.5"]);
        bootstrap_certificates(&auth, true).unwrap();

        assert!(!validate_certificate("192.168.64.5", &auth).unwrap());
    }

    #[test]
    fn test_generate_cert_without_ca() {
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        let result = generate_cert(&CertOptions {
            hosts: vec!["localhost".to_string()],
            cert_file: auth.server_cert_path.clone(),
            key_file: auth.server_key_path.clone(),
            ca_file: auth.ca_cert_path.clone(),
            ca_key_file: auth.ca_private_key_path.clone(),
            org: "x".to_string(),
            bits: DEFAULT_BITS,
        });
        assert!(matches!(result, Err(CertError::MissingCa(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let auth = auth(&temp);
        bootstrap_certificates(&auth, false).unwrap();
        let mode = fs::metadata(&auth.ca_private_key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
