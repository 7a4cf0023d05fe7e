//! Short Weierstrass curve arithmetic over the two PACE standardized
//! domain parameters the reader supports. The generic mapping needs
//! multiplication with an arbitrary base point, which `ring` does not expose.

use num_bigint::BigUint;

use crate::utils::PassportError;
use crate::verification::crypto;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPoint {
    Infinity,
    Affine { x: BigUint, y: BigUint },
}

impl EcPoint {
    pub fn x(&self) -> Option<&BigUint> {
        match self {
            EcPoint::Affine { x, .. } => Some(x),
            EcPoint::Infinity => None,
        }
    }
}

/// Jacobian coordinates, z == 0 is the point at infinity.
#[derive(Clone)]
struct Jacobian {
    x: BigUint,
    y: BigUint,
    z: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curve {
    pub name: &'static str,
    p: BigUint,
    a: BigUint,
    b: BigUint,
    g: (BigUint, BigUint),
    n: BigUint,
}

fn hex_int(s: &str) -> BigUint {
    BigUint::parse_bytes(s.as_bytes(), 16).unwrap_or_default()
}

fn zero() -> BigUint {
    BigUint::from(0u32)
}

impl Curve {
    pub fn p256() -> Curve {
        Curve {
            name: "secp256r1",
            p: hex_int("FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFF"),
            a: hex_int("FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFC"),
            b: hex_int("5AC635D8AA3A93E7B3EBBD55769886BC651D06B0CC53B0F63BCE3C3E27D2604B"),
            g: (
                hex_int("6B17D1F2E12C4247F8BCE6E563A440F277037D812DEB33A0F4A13945D898C296"),
                hex_int("4FE342E2FE1A7F9B8EE7EB4A7C0F9E162BCE33576B315ECECBB6406837BF51F5"),
            ),
            n: hex_int("FFFFFFFF00000000FFFFFFFFFFFFFFFFBCE6FAADA7179E84F3B9CAC2FC632551"),
        }
    }

    pub fn brainpool_p256r1() -> Curve {
        Curve {
            name: "brainpoolP256r1",
            p: hex_int("A9FB57DBA1EEA9BC3E660A909D838D726E3BF623D52620282013481D1F6E5377"),
            a: hex_int("7D5A0975FC2C3057EEF67530417AFFE7FB8055C126DC5C6CE94A4B44F330B5D9"),
            b: hex_int("26DC5C6CE94A4B44F330B5D9BBD77CBF958416295CF7E1CE6BCCDC18FF8C07B6"),
            g: (
                hex_int("8BD2AEB9CB7E57CB2C4B482FFC81B7AFB9DE27E1E3BD23C23A4453BD9ACE3262"),
                hex_int("547EF835C3DAC4FD97F8461A14611DC9C27745132DED8E545C1D54C72F046997"),
            ),
            n: hex_int("A9FB57DBA1EEA9BC3E660A909D838D718C397AA3B561A6F7901E0E82974856A7"),
        }
    }

    /// Standardized domain parameter ids (BSI TR-03110 / Doc 9303 part 11).
    pub fn from_parameter_id(id: u32) -> Option<Curve> {
        match id {
            12 => Some(Curve::p256()),
            13 => Some(Curve::brainpool_p256r1()),
            _ => None,
        }
    }

    pub fn field_size(&self) -> usize {
        ((self.p.bits() + 7) / 8) as usize
    }

    pub fn order(&self) -> &BigUint {
        &self.n
    }

    pub fn generator(&self) -> EcPoint {
        EcPoint::Affine {
            x: self.g.0.clone(),
            y: self.g.1.clone(),
        }
    }

    fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.p
    }

    fn add_mod(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.p
    }

    fn sub_mod(&self, a: &BigUint, b: &BigUint) -> BigUint {
        ((a + &self.p) - b) % &self.p
    }

    fn small(&self, k: u32, a: &BigUint) -> BigUint {
        (a * BigUint::from(k)) % &self.p
    }

    fn invert(&self, a: &BigUint) -> BigUint {
        let exponent = &self.p - BigUint::from(2u32);
        a.modpow(&exponent, &self.p)
    }

    pub fn is_on_curve(&self, point: &EcPoint) -> bool {
        match point {
            EcPoint::Infinity => true,
            EcPoint::Affine { x, y } => {
                if x >= &self.p || y >= &self.p {
                    return false;
                }
                let lhs = self.mul(y, y);
                let x3 = self.mul(&self.mul(x, x), x);
                let rhs = self.add_mod(&self.add_mod(&x3, &self.mul(&self.a, x)), &self.b);
                lhs == rhs
            }
        }
    }

    fn to_jacobian(&self, point: &EcPoint) -> Jacobian {
        match point {
            EcPoint::Infinity => Jacobian {
                x: BigUint::from(1u32),
                y: BigUint::from(1u32),
                z: zero(),
            },
            EcPoint::Affine { x, y } => Jacobian {
                x: x.clone(),
                y: y.clone(),
                z: BigUint::from(1u32),
            },
        }
    }

    fn to_affine(&self, point: &Jacobian) -> EcPoint {
        if point.z == zero() {
            return EcPoint::Infinity;
        }
        let z_inv = self.invert(&point.z);
        let z_inv2 = self.mul(&z_inv, &z_inv);
        let z_inv3 = self.mul(&z_inv2, &z_inv);
        EcPoint::Affine {
            x: self.mul(&point.x, &z_inv2),
            y: self.mul(&point.y, &z_inv3),
        }
    }

    fn double_j(&self, point: &Jacobian) -> Jacobian {
        if point.z == zero() || point.y == zero() {
            return self.to_jacobian(&EcPoint::Infinity);
        }
        let xx = self.mul(&point.x, &point.x);
        let yy = self.mul(&point.y, &point.y);
        let yyyy = self.mul(&yy, &yy);
        let zz = self.mul(&point.z, &point.z);
        let s = self.small(4, &self.mul(&point.x, &yy));
        let m = self.add_mod(&self.small(3, &xx), &self.mul(&self.a, &self.mul(&zz, &zz)));
        let x3 = self.sub_mod(&self.mul(&m, &m), &self.small(2, &s));
        let y3 = self.sub_mod(&self.mul(&m, &self.sub_mod(&s, &x3)), &self.small(8, &yyyy));
        let z3 = self.small(2, &self.mul(&point.y, &point.z));
        Jacobian { x: x3, y: y3, z: z3 }
    }

    fn add_j(&self, p: &Jacobian, q: &Jacobian) -> Jacobian {
        if p.z == zero() {
            return q.clone();
        }
        if q.z == zero() {
            return p.clone();
        }
        let z1z1 = self.mul(&p.z, &p.z);
        let z2z2 = self.mul(&q.z, &q.z);
        let u1 = self.mul(&p.x, &z2z2);
        let u2 = self.mul(&q.x, &z1z1);
        let s1 = self.mul(&p.y, &self.mul(&q.z, &z2z2));
        let s2 = self.mul(&q.y, &self.mul(&p.z, &z1z1));
        if u1 == u2 {
            return if s1 == s2 {
                self.double_j(p)
            } else {
                self.to_jacobian(&EcPoint::Infinity)
            };
        }
        let h = self.sub_mod(&u2, &u1);
        let r = self.sub_mod(&s2, &s1);
        let hh = self.mul(&h, &h);
        let hhh = self.mul(&hh, &h);
        let u1hh = self.mul(&u1, &hh);
        let x3 = self.sub_mod(&self.sub_mod(&self.mul(&r, &r), &hhh), &self.small(2, &u1hh));
        let y3 = self.sub_mod(&self.mul(&r, &self.sub_mod(&u1hh, &x3)), &self.mul(&s1, &hhh));
        let z3 = self.mul(&h, &self.mul(&p.z, &q.z));
        Jacobian { x: x3, y: y3, z: z3 }
    }

    pub fn add(&self, p: &EcPoint, q: &EcPoint) -> EcPoint {
        self.to_affine(&self.add_j(&self.to_jacobian(p), &self.to_jacobian(q)))
    }

    /// Left-to-right double and add.
    pub fn multiply(&self, k: &BigUint, point: &EcPoint) -> EcPoint {
        let base = self.to_jacobian(point);
        let mut acc = self.to_jacobian(&EcPoint::Infinity);
        for byte in k.to_bytes_be() {
            for bit in (0..8).rev() {
                acc = self.double_j(&acc);
                if (byte >> bit) & 1 == 1 {
                    acc = self.add_j(&acc, &base);
                }
            }
        }
        self.to_affine(&acc)
    }

    /// Uniform-ish private key in [1, n).
    pub fn random_scalar(&self) -> Result<BigUint, PassportError> {
        let bytes = crypto::random_bytes(self.field_size() + 8)?;
        let one = BigUint::from(1u32);
        Ok(BigUint::from_bytes_be(&bytes) % (&self.n - &one) + one)
    }

    fn fixed_bytes(&self, value: &BigUint) -> Vec<u8> {
        let raw = value.to_bytes_be();
        let size = self.field_size();
        let mut out = vec![0u8; size.saturating_sub(raw.len())];
        out.extend(raw);
        out
    }

    /// X coordinate as a fixed-width big-endian octet string.
    pub fn encode_x(&self, point: &EcPoint) -> Option<Vec<u8>> {
        point.x().map(|x| self.fixed_bytes(x))
    }

    /// Uncompressed SEC1 encoding, 0x04 || X || Y.
    pub fn encode_point(&self, point: &EcPoint) -> Result<Vec<u8>, PassportError> {
        match point {
            EcPoint::Infinity => Err(PassportError::CryptoError("Cannot encode the point at infinity".to_string())),
            EcPoint::Affine { x, y } => {
                let mut out = vec![0x04];
                out.extend(self.fixed_bytes(x));
                out.extend(self.fixed_bytes(y));
                Ok(out)
            }
        }
    }

    pub fn decode_point(&self, bytes: &[u8]) -> Result<EcPoint, PassportError> {
        let size = self.field_size();
        if bytes.len() != 1 + 2 * size || bytes[0] != 0x04 {
            return Err(PassportError::CryptoError(format!(
                "Expected an uncompressed {} point, got {} bytes",
                self.name,
                bytes.len()
            )));
        }
        let point = EcPoint::Affine {
            x: BigUint::from_bytes_be(&bytes[1..1 + size]),
            y: BigUint::from_bytes_be(&bytes[1 + size..]),
        };
        if !self.is_on_curve(&point) {
            return Err(PassportError::CryptoError(format!("Point is not on {}", self.name)));
        }
        Ok(point)
    }
}
