//! Standard security handler, decrypt side only.
//!
//! Supports RC4 (40 to 128 bit), AESV2 and AESV3 (revisions 2 to 6).
//! The handler is built once per document from the `/Encrypt` dictionary
//! and the first element of the trailer `/ID`, then used by the xref to
//! decrypt the strings and streams of every fetched object.

use super::error::{PDFError, PDFResult};
use super::parser::{Dict, PDFObject, Ref};
use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Arc;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Padding string used to extend passwords to 32 bytes.
const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xbf, 0x4e, 0x5e, 0x4e, 0x75, 0x8a, 0x41, 0x64, 0x00, 0x4e, 0x56, 0xff, 0xfa, 0x01,
    0x08, 0x2e, 0x2e, 0x00, 0xb6, 0xd0, 0x68, 0x3e, 0x80, 0x2f, 0x0c, 0xa9, 0xfe, 0x64, 0x53,
    0x69, 0x7a,
];

/// RC4 stream cipher. Encryption and decryption are the same operation.
pub struct Arcfour {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Arcfour {
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, j as usize);
            }
        }
        Arcfour { s, i: 0, j: 0 }
    }

    pub fn process(&mut self, input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .map(|byte| {
                self.i = self.i.wrapping_add(1);
                self.j = self.j.wrapping_add(self.s[self.i as usize]);
                self.s.swap(self.i as usize, self.j as usize);
                let k = self.s[self.s[self.i as usize].wrapping_add(self.s[self.j as usize]) as usize];
                byte ^ k
            })
            .collect()
    }
}

/// Cipher used for one class of data (strings or streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Identity,
    Rc4,
    AesV2,
    AesV3,
}

/// Decrypts strings and streams of an encrypted document.
#[derive(Debug, Clone)]
pub struct CryptoHandler {
    key: Vec<u8>,
    string_cipher: CipherKind,
    stream_cipher: CipherKind,
    encrypt_metadata: bool,
}

/// Parsed `/Encrypt` entries.
struct EncryptParams {
    version: i64,
    revision: i64,
    key_length: usize,
    o: Vec<u8>,
    u: Vec<u8>,
    oe: Vec<u8>,
    ue: Vec<u8>,
    p: i32,
    encrypt_metadata: bool,
}

impl EncryptParams {
    fn from_dict(dict: &Dict) -> PDFResult<Self> {
        let filter = dict.get("Filter").and_then(PDFObject::as_name).unwrap_or("");
        if filter != "Standard" {
            return Err(PDFError::unsupported(format!("security handler /{filter}")));
        }

        let bytes = |key: &str| {
            dict.get(key)
                .and_then(PDFObject::as_bytes)
                .map(<[u8]>::to_vec)
                .unwrap_or_default()
        };
        let version = dict.get("V").and_then(PDFObject::as_i64).unwrap_or(0);
        let revision = dict.get("R").and_then(PDFObject::as_i64).unwrap_or(2);
        let bits = dict.get("Length").and_then(PDFObject::as_usize).unwrap_or(40);

        let key_length = match version {
            1 => 5,
            2 | 3 => (bits / 8).clamp(5, 16),
            4 => 16,
            5 => 32,
            other => return Err(PDFError::unsupported(format!("encryption version {other}"))),
        };

        Ok(EncryptParams {
            version,
            revision,
            key_length,
            o: bytes("O"),
            u: bytes("U"),
            oe: bytes("OE"),
            ue: bytes("UE"),
            p: dict.get("P").and_then(PDFObject::as_i64).unwrap_or(-1) as i32,
            encrypt_metadata: dict
                .get("EncryptMetadata")
                .and_then(PDFObject::as_bool)
                .unwrap_or(true),
        })
    }
}

impl CryptoHandler {
    /// Builds the handler and authenticates `password`, first as the user
    /// password and then as the owner password.
    ///
    /// Fails with an unsupported-feature error when the handler is not the
    /// standard one or the password does not open the document.
    pub fn new(encrypt: &Dict, file_id: &[u8], password: &[u8]) -> PDFResult<Self> {
        let params = EncryptParams::from_dict(encrypt)?;

        let key = if params.revision >= 5 {
            authenticate_aes256(&params, password)
        } else {
            authenticate_legacy(&params, file_id, password)
        }
        .ok_or_else(|| PDFError::unsupported("encrypted document: password required"))?;

        let (string_cipher, stream_cipher) = if params.version >= 4 {
            (
                crypt_filter_kind(encrypt, "StrF"),
                crypt_filter_kind(encrypt, "StmF"),
            )
        } else {
            (CipherKind::Rc4, CipherKind::Rc4)
        };

        tracing::debug!(
            "standard security handler V{} R{}: strings {string_cipher:?}, streams {stream_cipher:?}",
            params.version,
            params.revision
        );

        Ok(CryptoHandler {
            key,
            string_cipher,
            stream_cipher,
            encrypt_metadata: params.encrypt_metadata,
        })
    }

    /// Key for one object. AESV3 uses the file key as is.
    fn object_key(&self, cipher: CipherKind, r: Ref) -> Vec<u8> {
        if cipher == CipherKind::AesV3 {
            return self.key.clone();
        }
        let mut context = md5::Context::new();
        context.consume(&self.key);
        context.consume(&r.num.to_le_bytes()[..3]);
        context.consume(&r.generation.to_le_bytes()[..2]);
        if cipher == CipherKind::AesV2 {
            context.consume(b"sAlT");
        }
        let digest = context.finalize().0;
        digest[..(self.key.len() + 5).min(16)].to_vec()
    }

    fn decrypt_with(&self, cipher: CipherKind, data: &[u8], r: Ref) -> Vec<u8> {
        match cipher {
            CipherKind::Identity => data.to_vec(),
            CipherKind::Rc4 => Arcfour::new(&self.object_key(cipher, r)).process(data),
            CipherKind::AesV2 | CipherKind::AesV3 => {
                aes_cbc_decrypt(&self.object_key(cipher, r), data).unwrap_or_else(|e| {
                    tracing::debug!("AES decryption of {r} failed: {e}");
                    Vec::new()
                })
            }
        }
    }

    pub fn decrypt_string(&self, data: &[u8], r: Ref) -> Vec<u8> {
        self.decrypt_with(self.string_cipher, data, r)
    }

    pub fn decrypt_stream(&self, data: &[u8], r: Ref) -> Vec<u8> {
        self.decrypt_with(self.stream_cipher, data, r)
    }

    /// Decrypts every string and stream inside `obj`, which was read as
    /// indirect object `r`.
    ///
    /// Cross-reference streams are stored in the clear, and so are metadata
    /// streams when `/EncryptMetadata` is false.
    pub fn decrypt_object(&self, obj: &mut PDFObject, r: Ref) {
        match obj {
            PDFObject::String(s) | PDFObject::HexString(s) => {
                *s = self.decrypt_string(s, r);
            }
            PDFObject::Array(items) => {
                for item in items {
                    self.decrypt_object(item, r);
                }
            }
            PDFObject::Dictionary(dict) => {
                for value in dict.values_mut() {
                    self.decrypt_object(value, r);
                }
            }
            PDFObject::Stream(stream) => {
                let kind = stream.dict.get("Type").and_then(PDFObject::as_name);
                if kind == Some("XRef") {
                    return;
                }
                let clear_metadata = kind == Some("Metadata") && !self.encrypt_metadata;
                let identity_filter = matches!(
                    stream.dict.get("Filter"),
                    Some(PDFObject::Name(n)) if n == "Crypt"
                ) || stream
                    .dict
                    .get("Filter")
                    .and_then(PDFObject::as_array)
                    .and_then(<[PDFObject]>::first)
                    .is_some_and(|f| f.is_name("Crypt"));

                let stream = Arc::make_mut(stream);
                for value in stream.dict.values_mut() {
                    self.decrypt_object(value, r);
                }
                if !clear_metadata && !identity_filter {
                    stream.raw = self.decrypt_stream(&stream.raw, r);
                }
            }
            _ => {}
        }
    }
}

/// Maps a `/StmF` or `/StrF` crypt filter name through `/CF`.
fn crypt_filter_kind(encrypt: &Dict, which: &str) -> CipherKind {
    let name = encrypt
        .get(which)
        .and_then(PDFObject::as_name)
        .unwrap_or("Identity");
    if name == "Identity" {
        return CipherKind::Identity;
    }
    let method = encrypt
        .get("CF")
        .and_then(PDFObject::as_dict)
        .and_then(|cf| cf.get(name))
        .and_then(PDFObject::as_dict)
        .and_then(|f| f.get("CFM"))
        .and_then(PDFObject::as_name);
    match method {
        Some("V2") => CipherKind::Rc4,
        Some("AESV2") => CipherKind::AesV2,
        Some("AESV3") => CipherKind::AesV3,
        _ => CipherKind::Identity,
    }
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// File key from a user password (revisions 2 to 4).
fn legacy_file_key(params: &EncryptParams, file_id: &[u8], password: &[u8]) -> Vec<u8> {
    let n = params.key_length;
    let mut context = md5::Context::new();
    context.consume(pad_password(password));
    context.consume(&params.o);
    context.consume(params.p.to_le_bytes());
    context.consume(file_id);
    if params.revision >= 4 && !params.encrypt_metadata {
        context.consume([0xffu8; 4]);
    }
    let mut key = context.finalize().0.to_vec();

    if params.revision >= 3 {
        for _ in 0..50 {
            key = md5::compute(&key[..n]).0.to_vec();
        }
    }
    key.truncate(n);
    key
}

/// Expected `/U` for a file key; revisions 3+ compare only 16 bytes.
fn legacy_user_hash(params: &EncryptParams, file_id: &[u8], key: &[u8]) -> Vec<u8> {
    if params.revision == 2 {
        return Arcfour::new(key).process(&PASSWORD_PADDING);
    }
    let mut context = md5::Context::new();
    context.consume(PASSWORD_PADDING);
    context.consume(file_id);
    let mut hash = Arcfour::new(key).process(&context.finalize().0);
    for i in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        hash = Arcfour::new(&round_key).process(&hash);
    }
    hash
}

fn authenticate_legacy(params: &EncryptParams, file_id: &[u8], password: &[u8]) -> Option<Vec<u8>> {
    let try_user = |candidate: &[u8]| {
        let key = legacy_file_key(params, file_id, candidate);
        let expected = legacy_user_hash(params, file_id, &key);
        let compared = if params.revision == 2 { 32 } else { 16 };
        (params.u.len() >= compared && params.u[..compared] == expected[..compared]).then_some(key)
    };

    if let Some(key) = try_user(password) {
        return Some(key);
    }

    // Owner password: recover the user password from /O
    let mut owner_key = md5::compute(pad_password(password)).0.to_vec();
    if params.revision >= 3 {
        for _ in 0..50 {
            owner_key = md5::compute(&owner_key).0.to_vec();
        }
    }
    owner_key.truncate(params.key_length);

    let user_password = if params.revision == 2 {
        Arcfour::new(&owner_key).process(&params.o)
    } else {
        let mut data = params.o.clone();
        for i in (0..=19u8).rev() {
            let round_key: Vec<u8> = owner_key.iter().map(|b| b ^ i).collect();
            data = Arcfour::new(&round_key).process(&data);
        }
        data
    };
    try_user(&user_password)
}

/// Password hash for revisions 5 (plain SHA-256) and 6 (iterated).
fn aes256_hash(revision: i64, password: &[u8], salt: &[u8], user_data: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(password.len() + salt.len() + user_data.len());
    input.extend_from_slice(password);
    input.extend_from_slice(salt);
    input.extend_from_slice(user_data);
    let mut k = Sha256::digest(&input).to_vec();
    if revision < 6 {
        return k;
    }

    let mut round = 0u32;
    loop {
        let mut block = Vec::with_capacity(password.len() + k.len() + user_data.len());
        block.extend_from_slice(password);
        block.extend_from_slice(&k);
        block.extend_from_slice(user_data);
        let mut k1 = block.repeat(64);
        let len = k1.len();

        let Ok(cipher) = Aes128CbcEnc::new_from_slices(&k[..16], &k[16..32]) else {
            return k;
        };
        let Ok(e) = cipher.encrypt_padded_mut::<NoPadding>(&mut k1, len) else {
            return k;
        };
        let e = e.to_vec();

        let remainder = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
        k = match remainder {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };

        round += 1;
        let last = e.last().copied().unwrap_or(0) as u32;
        if round >= 64 && last <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    k
}

fn authenticate_aes256(params: &EncryptParams, password: &[u8]) -> Option<Vec<u8>> {
    let password = &password[..password.len().min(127)];
    let (o, u) = (&params.o, &params.u);
    if o.len() < 48 || u.len() < 48 {
        return None;
    }
    let r = params.revision;

    let (intermediate, wrapped) = if aes256_hash(r, password, &u[32..40], &[]) == u[..32] {
        (aes256_hash(r, password, &u[40..48], &[]), &params.ue)
    } else if aes256_hash(r, password, &o[32..40], &u[..48]) == o[..32] {
        (aes256_hash(r, password, &o[40..48], &u[..48]), &params.oe)
    } else {
        return None;
    };

    if wrapped.len() < 32 {
        return None;
    }
    let mut buf = wrapped[..32].to_vec();
    let cipher = Aes256CbcDec::new_from_slices(&intermediate, &[0u8; 16]).ok()?;
    let key = cipher.decrypt_padded_mut::<NoPadding>(&mut buf).ok()?;
    Some(key.to_vec())
}

/// AES-CBC with the IV in the first 16 bytes and PKCS#7 padding.
fn aes_cbc_decrypt(key: &[u8], data: &[u8]) -> PDFResult<Vec<u8>> {
    if data.len() < 16 {
        return Ok(Vec::new());
    }
    let (iv, body) = data.split_at(16);
    let mut buf = body[..body.len() - body.len() % 16].to_vec();
    if buf.is_empty() {
        return Ok(buf);
    }

    let plain_len = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| PDFError::malformed("bad AES-128 key", None))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| PDFError::malformed("AES-128 decryption failed", None))?
            .len(),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| PDFError::malformed("bad AES-256 key", None))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| PDFError::malformed("AES-256 decryption failed", None))?
            .len(),
        other => {
            return Err(PDFError::malformed(format!("AES key of {other} bytes"), None));
        }
    };
    buf.truncate(plain_len);

    if let Some(&pad) = buf.last() {
        let pad = pad as usize;
        if (1..=16).contains(&pad)
            && pad <= buf.len()
            && buf[buf.len() - pad..].iter().all(|&b| b as usize == pad)
        {
            buf.truncate(buf.len() - pad);
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    /// Builds the /O value for an owner password (revision 3).
    fn owner_value(owner: &[u8], user: &[u8], key_length: usize) -> Vec<u8> {
        let mut key = md5::compute(pad_password(owner)).0.to_vec();
        for _ in 0..50 {
            key = md5::compute(&key).0.to_vec();
        }
        key.truncate(key_length);
        let mut data = pad_password(user).to_vec();
        for i in 0..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            data = Arcfour::new(&round_key).process(&data);
        }
        data
    }

    fn rc4_encrypt_dict(owner: &[u8], user: &[u8], file_id: &[u8]) -> Dict {
        let o = owner_value(owner, user, 16);
        let params = EncryptParams {
            version: 2,
            revision: 3,
            key_length: 16,
            o: o.clone(),
            u: Vec::new(),
            oe: Vec::new(),
            ue: Vec::new(),
            p: -4,
            encrypt_metadata: true,
        };
        let key = legacy_file_key(&params, file_id, user);
        let mut u = legacy_user_hash(&params, file_id, &key);
        u.resize(32, 0);

        let mut dict = Dict::default();
        dict.insert("Filter".into(), PDFObject::Name("Standard".into()));
        dict.insert("V".into(), PDFObject::Number(2.0));
        dict.insert("R".into(), PDFObject::Number(3.0));
        dict.insert("Length".into(), PDFObject::Number(128.0));
        dict.insert("P".into(), PDFObject::Number(-4.0));
        dict.insert("O".into(), PDFObject::String(o));
        dict.insert("U".into(), PDFObject::String(u));
        dict
    }

    #[test]
    fn test_arcfour_known_vectors() {
        assert_eq!(
            Arcfour::new(b"Key").process(b"Plaintext"),
            hex("bbf316e8d940af0ad3")
        );
        assert_eq!(Arcfour::new(b"Wiki").process(b"pedia"), hex("1021bf0420"));
    }

    #[test]
    fn test_pad_password() {
        assert_eq!(pad_password(b""), PASSWORD_PADDING);
        let padded = pad_password(b"abc");
        assert_eq!(&padded[..3], b"abc");
        assert_eq!(&padded[3..], &PASSWORD_PADDING[..29]);
    }

    #[test]
    fn test_empty_user_password_opens_rc4_document() {
        let file_id = b"0123456789abcdef";
        let dict = rc4_encrypt_dict(b"owner", b"", file_id);

        let handler = CryptoHandler::new(&dict, file_id, b"").unwrap();
        let r = Ref::new(7, 0);
        let secret = Arcfour::new(&handler.object_key(CipherKind::Rc4, r)).process(b"hello");
        assert_eq!(handler.decrypt_string(&secret, r), b"hello");
    }

    #[test]
    fn test_owner_password_opens_document() {
        let file_id = b"id";
        let dict = rc4_encrypt_dict(b"owner", b"user", file_id);

        assert!(CryptoHandler::new(&dict, file_id, b"").is_err());
        assert!(CryptoHandler::new(&dict, file_id, b"user").is_ok());
        assert!(CryptoHandler::new(&dict, file_id, b"owner").is_ok());
    }

    #[test]
    fn test_wrong_password_is_unsupported_feature() {
        let dict = rc4_encrypt_dict(b"owner", b"user", b"id");
        let err = CryptoHandler::new(&dict, b"id", b"nope").unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::UnsupportedFeatureError);
    }

    #[test]
    fn test_non_standard_handler_rejected() {
        let mut dict = Dict::default();
        dict.insert("Filter".into(), PDFObject::Name("Adobe.PubSec".into()));
        assert!(matches!(
            CryptoHandler::new(&dict, b"", b""),
            Err(PDFError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_aes_cbc_decrypt_strips_padding() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let mut buf = b"sixteen byte msg\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10\x10".to_vec();
        let len = buf.len();
        let cipher = Aes128CbcEnc::new_from_slices(&key, &iv).unwrap();
        let encrypted = cipher.encrypt_padded_mut::<NoPadding>(&mut buf, len).unwrap().to_vec();

        let mut data = iv.to_vec();
        data.extend_from_slice(&encrypted);
        assert_eq!(aes_cbc_decrypt(&key, &data).unwrap(), b"sixteen byte msg");
        assert!(aes_cbc_decrypt(&key, &iv).unwrap().is_empty());
    }

    #[test]
    fn test_aesv2_crypt_filter_selection() {
        let mut std_cf = Dict::default();
        std_cf.insert("CFM".into(), PDFObject::Name("AESV2".into()));
        let mut cf = Dict::default();
        cf.insert("StdCF".into(), PDFObject::Dictionary(std_cf));
        let mut dict = Dict::default();
        dict.insert("CF".into(), PDFObject::Dictionary(cf));
        dict.insert("StmF".into(), PDFObject::Name("StdCF".into()));
        dict.insert("StrF".into(), PDFObject::Name("Identity".into()));

        assert_eq!(crypt_filter_kind(&dict, "StmF"), CipherKind::AesV2);
        assert_eq!(crypt_filter_kind(&dict, "StrF"), CipherKind::Identity);
        assert_eq!(crypt_filter_kind(&dict, "EFF"), CipherKind::Identity);
    }

    #[test]
    fn test_decrypt_object_skips_xref_streams() {
        let handler = CryptoHandler {
            key: vec![1, 2, 3, 4, 5],
            string_cipher: CipherKind::Rc4,
            stream_cipher: CipherKind::Rc4,
            encrypt_metadata: true,
        };
        let mut dict = Dict::default();
        dict.insert("Type".into(), PDFObject::Name("XRef".into()));
        let mut obj = PDFObject::Stream(Arc::new(super::super::parser::PdfStream::new(
            dict,
            b"clear".to_vec(),
        )));
        handler.decrypt_object(&mut obj, Ref::new(3, 0));
        assert_eq!(obj.as_stream().unwrap().raw, b"clear");
    }
}
