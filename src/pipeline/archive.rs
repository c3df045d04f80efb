//! In-memory decryption of the downloaded attachment.
//!
//! The payload arrives base64url-encoded; once decoded it is a ZIP container
//! whose members are AES-encrypted. Nothing is written to disk: the archive is
//! read from the decoded buffer and each member is decompressed on demand
//! while iterating.

use std::io::{Cursor, Read};

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use secrecy::{ExposeSecret, SecretString};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::ArchiveError;
use crate::pipeline::types::ArchiveMember;

/// Gmail emits URL-safe base64, sometimes without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the provider's wire encoding into raw archive bytes.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    Ok(URL_SAFE_LENIENT.decode(payload.trim_ascii())?)
}

/// Decode `payload` and open it as a password-protected archive.
///
/// Only the central directory is parsed here. Member decryption errors
/// (including a wrong password) surface while iterating.
pub fn open(payload: &[u8], password: &SecretString) -> Result<DecryptedArchive, ArchiveError> {
    let bytes = decode_payload(payload)?;
    let archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArchiveError::Malformed(e.to_string()))?;

    Ok(DecryptedArchive {
        archive,
        password: password.clone(),
        next: 0,
    })
}

/// Upper bound on the up-front buffer taken from a member's declared size.
const MAX_PREALLOCATION: u64 = 64 << 20;

/// Header sizes are untrusted; larger members still grow while reading.
fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOCATION)).unwrap_or(0)
}

/// Single-pass sequence of decrypted members in archive order.
///
/// Consumed by value; re-reading requires calling [`open`] again. Directory
/// entries are skipped. The iterator stops after the first error.
pub struct DecryptedArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    password: SecretString,
    next: usize,
}

impl DecryptedArchive {
    /// Number of entries in the central directory, directories included.
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    fn read_member(&mut self, index: usize) -> Result<Option<ArchiveMember>, ArchiveError> {
        let (name, is_dir, encrypted) = {
            let raw = self
                .archive
                .by_index_raw(index)
                .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
            (raw.name().to_string(), raw.is_dir(), raw.encrypted())
        };

        if is_dir {
            return Ok(None);
        }

        let opened = if encrypted {
            self.archive
                .by_index_decrypt(index, self.password.expose_secret().as_bytes())
        } else {
            self.archive.by_index(index)
        };

        let mut file = opened.map_err(|e| match e {
            ZipError::InvalidPassword => ArchiveError::InvalidPassword {
                member: name.clone(),
            },
            other => ArchiveError::Member {
                member: name.clone(),
                reason: other.to_string(),
            },
        })?;

        let mut content = Vec::with_capacity(capacity_hint(file.size()));
        file.read_to_end(&mut content)
            .map_err(|e| ArchiveError::Member {
                member: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Some(ArchiveMember { name, content }))
    }
}

impl Iterator for DecryptedArchive {
    type Item = Result<ArchiveMember, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.archive.len() {
            let index = self.next;
            self.next += 1;

            match self.read_member(index) {
                Ok(Some(member)) => return Some(Ok(member)),
                Ok(None) => continue,
                Err(e) => {
                    self.next = self.archive.len();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for DecryptedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedArchive")
            .field("entries", &self.archive.len())
            .field("next", &self.next)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::{AesMode, CompressionMethod, ZipWriter};

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    pub(crate) fn encrypted_zip(members: &[(&str, &[u8])], password: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .with_aes_encryption(AesMode::Aes256, password);
        for (name, content) in members {
            writer.start_file(*name, options.clone()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn payload(bytes: &[u8]) -> Vec<u8> {
        URL_SAFE.encode(bytes).into_bytes()
    }

    #[test]
    fn declared_size_does_not_drive_huge_allocations() {
        assert_eq!(capacity_hint(0), 0);
        assert_eq!(capacity_hint(1024), 1024);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOCATION as usize);
    }

    #[test]
    fn yields_every_member_once_in_order() {
        let zip = encrypted_zip(
            &[
                ("A.txt", &b"alpha\n"[..]),
                ("B.txt", &b"bravo\n"[..]),
                ("C.DAT", &[0u8, 255, 7][..]),
            ],
            "s3cret",
        );
        let members: Vec<ArchiveMember> = open(&payload(&zip), &secret("s3cret"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["A.txt", "B.txt", "C.DAT"]);
        assert_eq!(members[0].content, b"alpha\n");
        assert_eq!(members[1].content, b"bravo\n");
        assert_eq!(members[2].content, vec![0u8, 255, 7]);
    }

    #[test]
    fn wrong_password_is_an_error_not_empty_output() {
        let zip = encrypted_zip(&[("A.txt", &b"alpha"[..])], "right");
        let mut archive = open(&payload(&zip), &secret("wrong")).unwrap();

        let first = archive.next().expect("an item, not an empty sequence");
        assert!(matches!(
            first,
            Err(ArchiveError::InvalidPassword { .. }) | Err(ArchiveError::Member { .. })
        ));
        assert!(archive.next().is_none(), "iteration stops after an error");
    }

    #[test]
    fn unpadded_payload_decodes() {
        let zip = encrypted_zip(&[("A.txt", &b"x"[..])], "pw");
        let unpadded = URL_SAFE_NO_PAD.encode(&zip);
        let count = open(unpadded.as_bytes(), &secret("pw")).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn standard_alphabet_is_rejected() {
        // '+' and '/' are not part of the URL-safe alphabet.
        let err = decode_payload(b"ab+/").unwrap_err();
        assert!(matches!(err, ArchiveError::Encoding(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = open(&payload(b"definitely not a zip"), &secret("pw")).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(_)));
    }

    #[test]
    fn directories_are_skipped_and_plain_members_read() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let plain: FileOptions<'_, ()> = FileOptions::default();
        writer.add_directory("out/", plain).unwrap();
        writer.start_file("out/readme.txt", plain).unwrap();
        writer.write_all(b"unencrypted").unwrap();
        let zip = writer.finish().unwrap().into_inner();

        let archive = open(&payload(&zip), &secret("unused")).unwrap();
        assert_eq!(archive.entry_count(), 2);
        let members: Vec<_> = archive.collect::<Result<_, _>>().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "out/readme.txt");
        assert_eq!(members[0].content, b"unencrypted");
    }
}
