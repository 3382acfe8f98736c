//! Server capability flags.

/// The subset of advertised capabilities the client acts on, plus the raw
/// atom list for diagnostics.
///
/// Rebuilt from every untagged `CAPABILITY` response and from the
/// `[CAPABILITY ...]` response code the server may attach to a greeting or
/// to LOGIN/AUTHENTICATE/STARTTLS completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `IMAP4rev1` (RFC 3501).
    pub imap4rev1: bool,
    /// STARTTLS upgrade support.
    pub starttls: bool,
    /// LOGIN is refused until the connection is encrypted.
    pub logindisabled: bool,
    /// `AUTH=PLAIN` mechanism.
    pub auth_plain: bool,
    /// `AUTH=LOGIN` mechanism.
    pub auth_login: bool,
    /// IDLE command support (RFC 2177).
    pub idle: bool,
    /// SASL initial response support (RFC 4959).
    pub sasl_ir: bool,
    /// Every capability atom as advertised.
    pub raw: Vec<String>,
}

impl Capabilities {
    /// Rebuilds the flag set from capability atoms.
    #[must_use]
    pub fn from_atoms<'a, I>(atoms: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut caps = Self::default();
        for atom in atoms {
            match atom.to_uppercase().as_str() {
                "IMAP4REV1" => caps.imap4rev1 = true,
                "STARTTLS" => caps.starttls = true,
                "LOGINDISABLED" => caps.logindisabled = true,
                "AUTH=PLAIN" => caps.auth_plain = true,
                "AUTH=LOGIN" => caps.auth_login = true,
                "IDLE" => caps.idle = true,
                "SASL-IR" => caps.sasl_ir = true,
                _ => {}
            }
            caps.raw.push(atom.to_string());
        }
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_atoms() {
        let caps = Capabilities::from_atoms(["IMAP4rev1", "AUTH=PLAIN", "SASL-IR", "IDLE"]);

        assert!(caps.imap4rev1);
        assert!(caps.auth_plain);
        assert!(caps.sasl_ir);
        assert!(caps.idle);
        assert!(!caps.starttls);
        assert!(!caps.logindisabled);
        assert!(!caps.auth_login);
    }

    #[test]
    fn test_case_insensitive() {
        let caps = Capabilities::from_atoms(["imap4rev1", "auth=plain"]);

        assert!(caps.imap4rev1);
        assert!(caps.auth_plain);
    }

    #[test]
    fn test_unknown_atoms_kept_raw() {
        let caps = Capabilities::from_atoms(["IMAP4rev1", "XLIST", "QUOTA"]);

        assert_eq!(caps.raw, vec!["IMAP4rev1", "XLIST", "QUOTA"]);
    }
}
