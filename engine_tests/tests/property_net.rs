//! Property-based tests for the wire encoding invariants in spec §8:
//! round-trip encoding (invariant 1) and buffer saturation (invariant 2).

use engine_shared::math::{Quat, Vec3};
use engine_shared::net::{PacketBuffer, MAX_BYTES};
use proptest::prelude::*;

proptest! {
    #[test]
    fn u8_roundtrips(v in any::<u8>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_u8(v));
        buf.begin_read();
        let mut out = 0u8;
        prop_assert!(buf.read_u8(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn u16_roundtrips(v in any::<u16>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_u16(v));
        buf.begin_read();
        let mut out = 0u16;
        prop_assert!(buf.read_u16(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn u32_roundtrips(v in any::<u32>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_u32(v));
        buf.begin_read();
        let mut out = 0u32;
        prop_assert!(buf.read_u32(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn u64_roundtrips(v in any::<u64>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_u64(v));
        buf.begin_read();
        let mut out = 0u64;
        prop_assert!(buf.read_u64(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn i32_roundtrips(v in any::<i32>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_i32(v));
        buf.begin_read();
        let mut out = 0i32;
        prop_assert!(buf.read_i32(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn f32_roundtrips(v in any::<f32>().prop_filter("no NaN", |v| !v.is_nan())) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_f32(v));
        buf.begin_read();
        let mut out = 0f32;
        prop_assert!(buf.read_f32(&mut out));
        prop_assert_eq!(out.to_bits(), v.to_bits());
    }

    #[test]
    fn bool_roundtrips(v in any::<bool>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_bool(v));
        buf.begin_read();
        let mut out = false;
        prop_assert!(buf.read_bool(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn string_roundtrips(s in "[a-zA-Z0-9 ]{0,200}") {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_string(&s));
        buf.begin_read();
        let mut out = String::new();
        prop_assert!(buf.read_string(&mut out));
        prop_assert_eq!(out, s);
    }

    #[test]
    fn vec3_roundtrips(x in -1000f32..1000f32, y in -1000f32..1000f32, z in -1000f32..1000f32) {
        let mut buf = PacketBuffer::new();
        let v = Vec3::new(x, y, z);
        prop_assert!(buf.write_vec3(v));
        buf.begin_read();
        let mut out = Vec3::ZERO;
        prop_assert!(buf.read_vec3(&mut out));
        prop_assert_eq!(out, v);
    }

    #[test]
    fn quat_roundtrips(x in -1f32..1f32, y in -1f32..1f32, z in -1f32..1f32, w in -1f32..1f32) {
        let mut buf = PacketBuffer::new();
        let q = Quat { x, y, z, w };
        prop_assert!(buf.write_quat(q));
        buf.begin_read();
        let mut out = Quat::default();
        prop_assert!(buf.read_quat(&mut out));
        prop_assert_eq!(out, q);
    }

    /// Invariant 2: writing past 1024 bytes fails at the boundary and the
    /// already-written prefix is left intact.
    #[test]
    fn saturation_never_exceeds_1024(n in 0usize..=(MAX_BYTES + 100)) {
        let mut buf = PacketBuffer::new();
        let chunk = vec![0xABu8; n];
        let wrote = buf.write_bytes(&chunk);
        if n <= MAX_BYTES {
            prop_assert!(wrote);
            prop_assert_eq!(buf.len(), n);
            prop_assert_eq!(buf.data(), &chunk[..]);
        } else {
            prop_assert!(!wrote);
            prop_assert_eq!(buf.len(), 0);
        }
    }

    /// A read past the write cursor fails without mutating the cursor, and
    /// a later successful read still sees the right value.
    #[test]
    fn failed_read_does_not_disturb_cursor(a in any::<u8>()) {
        let mut buf = PacketBuffer::new();
        prop_assert!(buf.write_u8(a));
        buf.begin_read();

        let before = {
            let mut tmp = 0u32;
            let ok = buf.read_u32(&mut tmp);
            prop_assert!(!ok);
            prop_assert_eq!(tmp, u32::MAX);
            ok
        };
        prop_assert!(!before);

        let mut got = 0u8;
        prop_assert!(buf.read_u8(&mut got));
        prop_assert_eq!(got, a);
    }
}
