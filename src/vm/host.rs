//! Host-function bridge.
//!
//! External routines implemented by the runtime (print, string, math, env,
//! random, time) are registered here with their expected signatures. The
//! bridge copies values out of slots according to the extern's declared
//! types and writes the result back; signatures are validated against the
//! builtin registry when the table is checked at startup.

use std::io::{BufRead, Write};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::il::types::Type;
use crate::vm::slot::Slot;
use crate::vm::strings::StringHeap;

/// Mutable runtime state a host routine may touch
pub struct HostCtx<'a> {
    /// The VM string heap
    pub strings: &'a mut StringHeap,
    /// Deterministically seeded xorshift state
    pub rng: &'a mut u64,
    /// Program output
    pub out: &'a mut dyn Write,
    /// Program input
    pub input: &'a mut dyn BufRead,
    /// VM start time, for `rt_clock_ms`
    pub start: Instant,
}

type HostImpl = fn(&mut HostCtx<'_>, &[Slot]) -> Result<Slot>;

/// One registered host routine
pub struct HostFn {
    /// Extern name as referenced from IL
    pub name: &'static str,
    /// Parameter types
    pub params: &'static [Type],
    /// Return type
    pub ret: Type,
    run: HostImpl,
}

impl HostFn {
    /// Dispatch with already-evaluated argument slots
    pub fn call(&self, ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
        (self.run)(ctx, args)
    }
}

use Type::{Void, F64, I1, I64, Str};

/// The host table. Keyed by name; order is cosmetic.
pub static HOST_TABLE: &[HostFn] = &[
    // print
    HostFn { name: "rt_print_i64", params: &[I64], ret: Void, run: rt_print_i64 },
    HostFn { name: "rt_print_f64", params: &[F64], ret: Void, run: rt_print_f64 },
    HostFn { name: "rt_print_str", params: &[Str], ret: Void, run: rt_print_str },
    HostFn { name: "rt_println", params: &[Str], ret: Void, run: rt_println },
    // string
    HostFn { name: "rt_concat", params: &[Str, Str], ret: Str, run: rt_concat },
    HostFn { name: "rt_len", params: &[Str], ret: I64, run: rt_len },
    HostFn { name: "rt_substr", params: &[Str, I64, I64], ret: Str, run: rt_substr },
    HostFn { name: "rt_left", params: &[Str, I64], ret: Str, run: rt_left },
    HostFn { name: "rt_right", params: &[Str, I64], ret: Str, run: rt_right },
    HostFn { name: "rt_str_eq", params: &[Str, Str], ret: I1, run: rt_str_eq },
    HostFn { name: "rt_str_index", params: &[Str, Str, I64], ret: I64, run: rt_str_index },
    HostFn { name: "rt_chr", params: &[I64], ret: Str, run: rt_chr },
    HostFn { name: "rt_asc", params: &[Str], ret: I64, run: rt_asc },
    HostFn { name: "rt_i64_to_str", params: &[I64], ret: Str, run: rt_i64_to_str },
    HostFn { name: "rt_f64_to_str", params: &[F64], ret: Str, run: rt_f64_to_str },
    HostFn { name: "rt_str_to_i64", params: &[Str], ret: I64, run: rt_str_to_i64 },
    HostFn { name: "rt_str_to_f64", params: &[Str], ret: F64, run: rt_str_to_f64 },
    // math
    HostFn { name: "rt_abs_i64", params: &[I64], ret: I64, run: rt_abs_i64 },
    HostFn { name: "rt_abs_f64", params: &[F64], ret: F64, run: rt_abs_f64 },
    HostFn { name: "rt_sqrt", params: &[F64], ret: F64, run: rt_sqrt },
    HostFn { name: "rt_sin", params: &[F64], ret: F64, run: rt_sin },
    HostFn { name: "rt_cos", params: &[F64], ret: F64, run: rt_cos },
    HostFn { name: "rt_floor", params: &[F64], ret: F64, run: rt_floor },
    HostFn { name: "rt_ceil", params: &[F64], ret: F64, run: rt_ceil },
    HostFn { name: "rt_pow", params: &[F64, F64], ret: F64, run: rt_pow },
    // env / random / time
    HostFn { name: "rt_input_line", params: &[], ret: Str, run: rt_input_line },
    HostFn { name: "rt_rand", params: &[], ret: F64, run: rt_rand },
    HostFn { name: "rt_seed_rand", params: &[I64], ret: Void, run: rt_seed_rand },
    HostFn { name: "rt_clock_ms", params: &[], ret: I64, run: rt_clock_ms },
];

/// Find a routine by extern name
pub fn find_host(name: &str) -> Option<&'static HostFn> {
    HOST_TABLE.iter().find(|h| h.name == name)
}

/// Declared signature of a host routine, for the verifier's extern check
pub fn host_signature(name: &str) -> Option<(&'static [Type], Type)> {
    find_host(name).map(|h| (h.params, h.ret))
}

/// Validate the host table against the builtin registry: every builtin's
/// lowered extern must exist here with an agreeing signature.
pub fn validate_host_table() -> Result<()> {
    for desc in crate::builtins::all_builtins() {
        for (key, extern_name) in desc.lowerings {
            let host = find_host(extern_name).ok_or_else(|| {
                Error::internal(format!(
                    "builtin {} lowers to unregistered extern {extern_name}",
                    desc.name
                ))
            })?;
            let want_ret = desc.result_for(*key);
            if host.ret != want_ret {
                return Err(Error::internal(format!(
                    "builtin {} expects {want_ret} from {extern_name}, host returns {}",
                    desc.name, host.ret
                )));
            }
        }
    }
    Ok(())
}

// ---- print ------------------------------------------------------------------

fn io_err(e: std::io::Error) -> Error {
    Error::Host(format!("write failed: {e}"))
}

fn rt_print_i64(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    writeln!(ctx.out, "{}", args[0].as_i64()).map_err(io_err)?;
    Ok(Slot::ZERO)
}

fn rt_print_f64(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    writeln!(ctx.out, "{}", args[0].as_f64()).map_err(io_err)?;
    Ok(Slot::ZERO)
}

fn rt_print_str(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    write!(ctx.out, "{}", ctx.strings.get(args[0].raw())).map_err(io_err)?;
    Ok(Slot::ZERO)
}

fn rt_println(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    writeln!(ctx.out, "{}", ctx.strings.get(args[0].raw())).map_err(io_err)?;
    Ok(Slot::ZERO)
}

// ---- string -----------------------------------------------------------------

fn rt_concat(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot(ctx.strings.concat(args[0].raw(), args[1].raw())))
}

fn rt_len(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let n = ctx.strings.get(args[0].raw()).chars().count();
    Ok(Slot::from_i64(n as i64))
}

/// 1-based substring of `len` characters, clamped to the string
fn rt_substr(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let s = ctx.strings.get(args[0].raw());
    let start = args[1].as_i64().max(1) as usize - 1;
    let len = args[2].as_i64().max(0) as usize;
    let out: String = s.chars().skip(start).take(len).collect();
    Ok(Slot(ctx.strings.alloc(out)))
}

fn rt_left(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let s = ctx.strings.get(args[0].raw());
    let n = args[1].as_i64().max(0) as usize;
    let out: String = s.chars().take(n).collect();
    Ok(Slot(ctx.strings.alloc(out)))
}

fn rt_right(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let s = ctx.strings.get(args[0].raw());
    let n = args[1].as_i64().max(0) as usize;
    let total = s.chars().count();
    let out: String = s.chars().skip(total.saturating_sub(n)).collect();
    Ok(Slot(ctx.strings.alloc(out)))
}

fn rt_str_eq(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_bool(ctx.strings.eq(args[0].raw(), args[1].raw())))
}

/// 1-based index of `needle` in `haystack` at or after `start`; 0 if absent
fn rt_str_index(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let hay: Vec<char> = ctx.strings.get(args[0].raw()).chars().collect();
    let needle: Vec<char> = ctx.strings.get(args[1].raw()).chars().collect();
    let start = (args[2].as_i64().max(1) as usize) - 1;
    if needle.is_empty() {
        return Ok(Slot::from_i64((start + 1).min(hay.len() + 1) as i64));
    }
    let mut i = start;
    while i + needle.len() <= hay.len() {
        if hay[i..i + needle.len()] == needle[..] {
            return Ok(Slot::from_i64((i + 1) as i64));
        }
        i += 1;
    }
    Ok(Slot::from_i64(0))
}

fn rt_chr(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let code = u32::try_from(args[0].as_i64()).ok().and_then(char::from_u32);
    let out = code.map(String::from).unwrap_or_default();
    Ok(Slot(ctx.strings.alloc(out)))
}

fn rt_asc(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let first = ctx.strings.get(args[0].raw()).chars().next();
    Ok(Slot::from_i64(first.map_or(0, |c| c as i64)))
}

fn rt_i64_to_str(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot(ctx.strings.alloc(args[0].as_i64().to_string())))
}

fn rt_f64_to_str(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot(ctx.strings.alloc(args[0].as_f64().to_string())))
}

fn rt_str_to_i64(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let v = ctx.strings.get(args[0].raw()).trim().parse::<i64>().unwrap_or(0);
    Ok(Slot::from_i64(v))
}

fn rt_str_to_f64(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    let v = ctx.strings.get(args[0].raw()).trim().parse::<f64>().unwrap_or(0.0);
    Ok(Slot::from_f64(v))
}

// ---- math -------------------------------------------------------------------

fn rt_abs_i64(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_i64(args[0].as_i64().wrapping_abs()))
}

fn rt_abs_f64(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().abs()))
}

fn rt_sqrt(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().sqrt()))
}

fn rt_sin(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().sin()))
}

fn rt_cos(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().cos()))
}

fn rt_floor(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().floor()))
}

fn rt_ceil(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().ceil()))
}

fn rt_pow(_: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_f64(args[0].as_f64().powf(args[1].as_f64())))
}

// ---- env / random / time ----------------------------------------------------

fn rt_input_line(ctx: &mut HostCtx<'_>, _: &[Slot]) -> Result<Slot> {
    let mut line = String::new();
    ctx.input
        .read_line(&mut line)
        .map_err(|e| Error::Host(format!("read failed: {e}")))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Slot(ctx.strings.alloc(line)))
}

/// xorshift64*, uniform in [0, 1)
fn rt_rand(ctx: &mut HostCtx<'_>, _: &[Slot]) -> Result<Slot> {
    let mut x = *ctx.rng;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *ctx.rng = x;
    let bits = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
    Ok(Slot::from_f64(bits as f64 / (1u64 << 53) as f64))
}

fn rt_seed_rand(ctx: &mut HostCtx<'_>, args: &[Slot]) -> Result<Slot> {
    // Zero would freeze xorshift; keep the state nonzero.
    *ctx.rng = (args[0].as_i64() as u64) | 1;
    Ok(Slot::ZERO)
}

fn rt_clock_ms(ctx: &mut HostCtx<'_>, _: &[Slot]) -> Result<Slot> {
    Ok(Slot::from_i64(ctx.start.elapsed().as_millis() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ctx<R>(f: impl FnOnce(&mut HostCtx<'_>) -> R) -> (R, String) {
        let mut strings = StringHeap::new();
        let mut rng = 0x9E37_79B9_7F4A_7C15u64;
        let mut out: Vec<u8> = Vec::new();
        let mut input = std::io::Cursor::new(Vec::<u8>::new());
        let r = {
            let mut ctx = HostCtx {
                strings: &mut strings,
                rng: &mut rng,
                out: &mut out,
                input: &mut input,
                start: Instant::now(),
            };
            f(&mut ctx)
        };
        (r, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_print_formats() {
        let (_, out) = with_ctx(|ctx| {
            rt_print_i64(ctx, &[Slot::from_i64(42)]).unwrap();
            rt_print_f64(ctx, &[Slot::from_f64(1.5)]).unwrap();
        });
        assert_eq!(out, "42\n1.5\n");
    }

    #[test]
    fn test_substr_is_one_based_and_clamped() {
        let (got, _) = with_ctx(|ctx| {
            let s = ctx.strings.alloc("HELLO");
            let h = rt_substr(ctx, &[Slot(s), Slot::from_i64(2), Slot::from_i64(3)])
                .unwrap()
                .raw();
            let clamped = rt_substr(ctx, &[Slot(s), Slot::from_i64(4), Slot::from_i64(99)])
                .unwrap()
                .raw();
            (
                ctx.strings.get(h).to_string(),
                ctx.strings.get(clamped).to_string(),
            )
        });
        assert_eq!(got.0, "ELL");
        assert_eq!(got.1, "LO");
    }

    #[test]
    fn test_str_index() {
        let (got, _) = with_ctx(|ctx| {
            let hay = ctx.strings.alloc("ABCABC");
            let needle = ctx.strings.alloc("BC");
            let first = rt_str_index(ctx, &[Slot(hay), Slot(needle), Slot::from_i64(1)])
                .unwrap()
                .as_i64();
            let second = rt_str_index(ctx, &[Slot(hay), Slot(needle), Slot::from_i64(3)])
                .unwrap()
                .as_i64();
            let missing = rt_str_index(ctx, &[Slot(hay), Slot(needle), Slot::from_i64(6)])
                .unwrap()
                .as_i64();
            (first, second, missing)
        });
        assert_eq!(got, (2, 5, 0));
    }

    #[test]
    fn test_rand_is_deterministic_and_bounded() {
        let (values, _) = with_ctx(|ctx| {
            (0..100)
                .map(|_| rt_rand(ctx, &[]).unwrap().as_f64())
                .collect::<Vec<_>>()
        });
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
        let (again, _) = with_ctx(|ctx| rt_rand(ctx, &[]).unwrap().as_f64());
        assert_eq!(values[0], again);
    }

    #[test]
    fn test_signature_lookup() {
        let (params, ret) = host_signature("rt_concat").unwrap();
        assert_eq!(params, &[Str, Str]);
        assert_eq!(ret, Str);
        assert!(host_signature("rt_unknown").is_none());
    }

    #[test]
    fn test_table_matches_builtin_registry() {
        validate_host_table().unwrap();
    }
}
