//! PKCS#11 constant codes used by the parameter types in this crate.

use std::fmt;

/// Mechanism types (`CKM_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ckm {
    RsaPkcsKeyPairGen,
    RsaPkcs,
    Sha1,
    Sha256,
    ExtractKeyFromKey,
    Ssl3PreMasterKeyGen,
    Ssl3MasterKeyDerive,
    WtlsPreMasterKeyGen,
    WtlsMasterKeyDerive,
    WtlsMasterKeyDeriveDhEcc,
    EcKeyPairGen,
    Ecdh1Derive,
    AesCbc,
}

impl Ckm {
    /// Native code of the mechanism.
    pub fn code(self) -> u32 {
        match self {
            Self::RsaPkcsKeyPairGen => 0x0000_0000,
            Self::RsaPkcs => 0x0000_0001,
            Self::Sha1 => 0x0000_0220,
            Self::Sha256 => 0x0000_0250,
            Self::ExtractKeyFromKey => 0x0000_0365,
            Self::Ssl3PreMasterKeyGen => 0x0000_0370,
            Self::Ssl3MasterKeyDerive => 0x0000_0371,
            Self::WtlsPreMasterKeyGen => 0x0000_03D0,
            Self::WtlsMasterKeyDerive => 0x0000_03D1,
            Self::WtlsMasterKeyDeriveDhEcc => 0x0000_03D2,
            Self::EcKeyPairGen => 0x0000_1040,
            Self::Ecdh1Derive => 0x0000_1050,
            Self::AesCbc => 0x0000_1082,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::RsaPkcsKeyPairGen => "CKM_RSA_PKCS_KEY_PAIR_GEN",
            Self::RsaPkcs => "CKM_RSA_PKCS",
            Self::Sha1 => "CKM_SHA_1",
            Self::Sha256 => "CKM_SHA256",
            Self::ExtractKeyFromKey => "CKM_EXTRACT_KEY_FROM_KEY",
            Self::Ssl3PreMasterKeyGen => "CKM_SSL3_PRE_MASTER_KEY_GEN",
            Self::Ssl3MasterKeyDerive => "CKM_SSL3_MASTER_KEY_DERIVE",
            Self::WtlsPreMasterKeyGen => "CKM_WTLS_PRE_MASTER_KEY_GEN",
            Self::WtlsMasterKeyDerive => "CKM_WTLS_MASTER_KEY_DERIVE",
            Self::WtlsMasterKeyDeriveDhEcc => "CKM_WTLS_MASTER_KEY_DERIVE_DH_ECC",
            Self::EcKeyPairGen => "CKM_EC_KEY_PAIR_GEN",
            Self::Ecdh1Derive => "CKM_ECDH1_DERIVE",
            Self::AesCbc => "CKM_AES_CBC",
        }
    }
}

impl From<Ckm> for u32 {
    fn from(ckm: Ckm) -> Self {
        ckm.code()
    }
}

impl From<Ckm> for u64 {
    fn from(ckm: Ckm) -> Self {
        u64::from(ckm.code())
    }
}

impl fmt::Display for Ckm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key derivation functions (`CKD_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ckd {
    /// Raw shared secret, no key derivation function applied.
    Null,
    /// ANSI X9.63 key derivation.
    Sha1Kdf,
    /// ANSI X9.42 key derivation (ASN.1 other info).
    Sha1KdfAsn1,
    /// ANSI X9.42 key derivation (concatenated other info).
    Sha1KdfConcatenate,
}

impl Ckd {
    /// Native code of the key derivation function.
    pub fn code(self) -> u32 {
        match self {
            Self::Null => 0x0000_0001,
            Self::Sha1Kdf => 0x0000_0002,
            Self::Sha1KdfAsn1 => 0x0000_0003,
            Self::Sha1KdfConcatenate => 0x0000_0004,
        }
    }

    /// Look up a key derivation function by native code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x0000_0001 => Some(Self::Null),
            0x0000_0002 => Some(Self::Sha1Kdf),
            0x0000_0003 => Some(Self::Sha1KdfAsn1),
            0x0000_0004 => Some(Self::Sha1KdfConcatenate),
            _ => None,
        }
    }
}

impl fmt::Display for Ckd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "CKD_NULL"),
            Self::Sha1Kdf => write!(f, "CKD_SHA1_KDF"),
            Self::Sha1KdfAsn1 => write!(f, "CKD_SHA1_KDF_ASN1"),
            Self::Sha1KdfConcatenate => write!(f, "CKD_SHA1_KDF_CONCATENATE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mechanism_codes() {
        assert_eq!(u32::from(Ckm::RsaPkcs), 0x0000_0001);
        assert_eq!(Ckm::ExtractKeyFromKey.code(), 0x365);
        assert_eq!(u64::from(Ckm::Sha1), 0x220);
        assert_eq!(Ckm::WtlsMasterKeyDerive.to_string(), "CKM_WTLS_MASTER_KEY_DERIVE");
    }

    #[test]
    fn kdf_codes_round_trip() {
        for kdf in [Ckd::Null, Ckd::Sha1Kdf, Ckd::Sha1KdfAsn1, Ckd::Sha1KdfConcatenate] {
            assert_eq!(Ckd::from_code(u64::from(kdf.code())), Some(kdf));
        }
        assert_eq!(Ckd::from_code(0x99), None);
        assert_eq!(Ckd::Sha1KdfAsn1.to_string(), "CKD_SHA1_KDF_ASN1");
    }
}
