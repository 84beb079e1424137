//! Semantics of the `apply-operator` records.
//!
//! Operators work on the operand stack: binary operators pop their
//! right operand by value and leave the left operand's reference on
//! top; the result either replaces the top as a temporary or, for the
//! assigning variants, is written back through it.

use crate::air::node::Xop;
use crate::runtime::context::ExecutiveContext;
use crate::runtime::error::RuntimeError;
use crate::runtime::reference::Modifier;
use crate::runtime::value::{Compare, Value};
use crate::source::SourceLocation;

fn pop_value(ctx: &mut ExecutiveContext<'_>) -> Result<Value, RuntimeError> {
    let value = ctx.stack().top(0).dereference_readonly()?;
    ctx.stack_mut().pop(1);
    Ok(value)
}

fn top_value(ctx: &mut ExecutiveContext<'_>) -> Result<Value, RuntimeError> {
    ctx.stack().top(0).dereference_readonly()
}

fn set_result(
    ctx: &mut ExecutiveContext<'_>,
    assign: bool,
    value: Value,
) -> Result<(), RuntimeError> {
    let top = ctx.stack_mut().mut_top(0);
    if assign {
        top.dereference_mutable(|slot| {
            *slot = value;
            Ok(())
        })
    } else {
        top.set_temporary(value);
        Ok(())
    }
}

fn type_error(sloc: &SourceLocation, xop: Xop, operands: &[&Value]) -> RuntimeError {
    let mut types = String::new();
    for (index, operand) in operands.iter().enumerate() {
        if index != 0 {
            types.push_str(", ");
        }
        types.push('`');
        types.push_str(operand.type_name());
        types.push('`');
    }
    RuntimeError::native(
        sloc.clone(),
        format!("operation `{xop:?}` not defined for {types}"),
    )
}

fn checked_int(
    sloc: &SourceLocation,
    what: &str,
    x: i64,
    y: i64,
    result: Option<i64>,
) -> Result<Value, RuntimeError> {
    match result {
        Some(value) => Ok(Value::Int(value)),
        None => Err(RuntimeError::native(
            sloc.clone(),
            format!("integer {what} overflow (operands were `{x}` and `{y}`)"),
        )),
    }
}

fn shift_count(sloc: &SourceLocation, value: &Value) -> Result<u32, RuntimeError> {
    match value {
        Value::Int(count) if *count >= 0 => Ok(u32::try_from(*count).unwrap_or(u32::MAX)),
        Value::Int(count) => Err(RuntimeError::native(
            sloc.clone(),
            format!("negative shift count (operands were `{count}`)"),
        )),
        other => Err(RuntimeError::native(
            sloc.clone(),
            format!(
                "shift count must be an integer (received `{}`)",
                other.type_name()
            ),
        )),
    }
}

fn rebuild_string(sloc: &SourceLocation, bytes: Vec<u8>) -> Result<Value, RuntimeError> {
    String::from_utf8(bytes).map(Value::Str).map_err(|_| {
        RuntimeError::native(
            sloc.clone(),
            "byte-granular string operation produced invalid UTF-8",
        )
    })
}

fn shift_string(
    sloc: &SourceLocation,
    text: &str,
    count: u32,
    xop: Xop,
) -> Result<Value, RuntimeError> {
    let bytes = text.as_bytes();
    let n = count as usize;
    let len = bytes.len();
    let out: Vec<u8> = match xop {
        // Length-preserving logical shifts, filling with spaces.
        Xop::Sll => {
            if n >= len {
                vec![b' '; len]
            } else {
                let mut out = bytes[n..].to_vec();
                out.resize(len, b' ');
                out
            }
        }
        Xop::Srl => {
            if n >= len {
                vec![b' '; len]
            } else {
                let mut out = vec![b' '; n];
                out.extend_from_slice(&bytes[..len - n]);
                out
            }
        }
        // Arithmetic shifts change the length.
        Xop::Sla => {
            let wanted = len.checked_add(n).ok_or_else(|| {
                RuntimeError::native(sloc.clone(), "string length overflow in shift")
            })?;
            let mut out = bytes.to_vec();
            out.resize(wanted, b' ');
            out
        }
        Xop::Sra => bytes[..len.saturating_sub(n)].to_vec(),
        _ => unreachable!("not a string shift"),
    };
    rebuild_string(sloc, out)
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn shift_integer(
    sloc: &SourceLocation,
    x: i64,
    n: u32,
    xop: Xop,
) -> Result<Value, RuntimeError> {
    let value = match xop {
        Xop::Sll => {
            if n >= 64 {
                0
            } else {
                ((x as u64) << n) as i64
            }
        }
        Xop::Srl => {
            if n >= 64 {
                0
            } else {
                ((x as u64) >> n) as i64
            }
        }
        Xop::Sla => {
            if n >= 64 {
                if x == 0 {
                    0
                } else {
                    return Err(RuntimeError::native(
                        sloc.clone(),
                        format!("integer shift overflow (operands were `{x}` and `{n}`)"),
                    ));
                }
            } else {
                let shifted = x.wrapping_shl(n);
                if shifted >> n != x {
                    return Err(RuntimeError::native(
                        sloc.clone(),
                        format!("integer shift overflow (operands were `{x}` and `{n}`)"),
                    ));
                }
                shifted
            }
        }
        Xop::Sra => {
            if n >= 64 {
                x >> 63
            } else {
                x >> n
            }
        }
        _ => unreachable!("not an integer shift"),
    };
    Ok(Value::Int(value))
}

fn bitwise_string(
    sloc: &SourceLocation,
    a: &str,
    b: &str,
    xop: Xop,
) -> Result<Value, RuntimeError> {
    let (x, y) = (a.as_bytes(), b.as_bytes());
    let out: Vec<u8> = match xop {
        // `&` truncates to the shared length; `|` and `^` keep the
        // tail of the longer operand.
        Xop::Andb => x.iter().zip(y).map(|(a, b)| a & b).collect(),
        Xop::Orb | Xop::Xorb => {
            let longest = x.len().max(y.len());
            (0..longest)
                .map(|i| {
                    let a = x.get(i).copied().unwrap_or(0);
                    let b = y.get(i).copied().unwrap_or(0);
                    if xop == Xop::Orb {
                        a | b
                    } else {
                        a ^ b
                    }
                })
                .collect()
        }
        _ => unreachable!("not a bitwise string operator"),
    };
    rebuild_string(sloc, out)
}

fn repeat_string(sloc: &SourceLocation, text: &str, count: i64) -> Result<Value, RuntimeError> {
    if count < 0 {
        return Err(RuntimeError::native(
            sloc.clone(),
            format!("string repetition count negative (operands were `{count}`)"),
        ));
    }
    let count = usize::try_from(count).expect("nonnegative count");
    if text.len().checked_mul(count).is_none() {
        return Err(RuntimeError::native(
            sloc.clone(),
            "string repetition result too long",
        ));
    }
    Ok(Value::Str(text.repeat(count)))
}

fn real_to_integer(sloc: &SourceLocation, x: f64) -> Result<Value, RuntimeError> {
    // 2^63 is exactly representable; values in [-2^63, 2^63) fit.
    let min = i64::MIN as f64;
    if x >= min && x < -min {
        #[allow(clippy::cast_possible_truncation)]
        Ok(Value::Int(x as i64))
    } else {
        Err(RuntimeError::native(
            sloc.clone(),
            format!("value not representable as an integer (operands were `{x}`)"),
        ))
    }
}

fn compare_total(
    sloc: &SourceLocation,
    lhs: &Value,
    rhs: &Value,
) -> Result<Compare, RuntimeError> {
    match lhs.compare(rhs) {
        Compare::Unordered => Err(RuntimeError::native(
            sloc.clone(),
            format!("values not comparable (operands were `{lhs}` and `{rhs}`)"),
        )),
        ordered => Ok(ordered),
    }
}

/// Applies one operator record to the operand stack.
#[allow(clippy::too_many_lines)]
pub(crate) fn apply_operator(
    ctx: &mut ExecutiveContext<'_>,
    xop: Xop,
    assign: bool,
    sloc: &SourceLocation,
) -> Result<(), RuntimeError> {
    match xop {
        // Modifier-pushing operators.
        Xop::Subscr => {
            let index = pop_value(ctx)?;
            let modifier = match index {
                Value::Int(i) => Modifier::ArrayIndex(i),
                Value::Str(key) => Modifier::ObjectKey(key),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            ctx.stack_mut().mut_top(0).push_modifier(modifier);
            Ok(())
        }
        Xop::Head => {
            ctx.stack_mut()
                .mut_top(0)
                .push_modifier(Modifier::ArrayHead);
            Ok(())
        }
        Xop::Tail => {
            ctx.stack_mut()
                .mut_top(0)
                .push_modifier(Modifier::ArrayTail);
            Ok(())
        }
        Xop::Random => {
            let sample = ctx.global_mut().random_u32();
            ctx.stack_mut()
                .mut_top(0)
                .push_modifier(Modifier::ArrayRandom(sample));
            Ok(())
        }
        Xop::Unset => {
            let previous = ctx.stack().top(0).dereference_unset()?;
            ctx.stack_mut().mut_top(0).set_temporary(previous);
            Ok(())
        }

        // Postfix increment and decrement: the old value is the
        // result; `assign` is ignored.
        Xop::Inc | Xop::Dec => {
            let old = top_value(ctx)?;
            let delta = if xop == Xop::Inc { 1_i64 } else { -1 };
            let new = match &old {
                Value::Int(x) => checked_int(
                    sloc,
                    if xop == Xop::Inc {
                        "increment"
                    } else {
                        "decrement"
                    },
                    *x,
                    delta,
                    x.checked_add(delta),
                )?,
                Value::Real(x) => Value::Real(x + delta as f64),
                other => return Err(type_error(sloc, xop, &[other])),
            };
            let top = ctx.stack_mut().mut_top(0);
            top.dereference_mutable(|slot| {
                *slot = new;
                Ok(())
            })?;
            top.set_temporary(old);
            Ok(())
        }

        Xop::Assign => {
            let value = pop_value(ctx)?;
            ctx.stack_mut().mut_top(0).dereference_mutable(|slot| {
                *slot = value;
                Ok(())
            })
        }

        // Unary operators.
        Xop::Pos => {
            let value = top_value(ctx)?;
            match value {
                Value::Int(_) | Value::Real(_) => set_result(ctx, assign, value),
                other => Err(type_error(sloc, xop, &[&other])),
            }
        }
        Xop::Neg => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(x) => checked_int(sloc, "negation", x, -1, x.checked_neg())?,
                Value::Real(x) => Value::Real(-x),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Notb => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Bool(x) => Value::Bool(!x),
                Value::Int(x) => Value::Int(!x),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Notl => {
            let value = top_value(ctx)?;
            set_result(ctx, assign, Value::Bool(!value.test()))
        }
        Xop::Countof => {
            let value = top_value(ctx)?;
            let count = match &value {
                Value::Null => 0,
                Value::Str(text) => i64::try_from(text.len()).expect("string length"),
                Value::Array(array) => i64::try_from(array.len()).expect("array length"),
                Value::Object(object) => i64::try_from(object.len()).expect("object length"),
                other => return Err(type_error(sloc, xop, &[other])),
            };
            set_result(ctx, assign, Value::Int(count))
        }
        Xop::Typeof => {
            let value = top_value(ctx)?;
            set_result(ctx, assign, Value::from(value.type_name()))
        }
        Xop::Sqrt => {
            let value = top_value(ctx)?;
            match value.as_real() {
                Some(x) => set_result(ctx, assign, Value::Real(x.sqrt())),
                None => Err(type_error(sloc, xop, &[&value])),
            }
        }
        Xop::Isnan => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(_) => false,
                Value::Real(x) => x.is_nan(),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, Value::Bool(result))
        }
        Xop::Isinf => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(_) => false,
                Value::Real(x) => x.is_infinite(),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, Value::Bool(result))
        }
        Xop::Abs => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(x) => checked_int(sloc, "negation", x, -1, x.checked_abs())?,
                Value::Real(x) => Value::Real(x.abs()),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Sign => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(x) => Value::Int(x >> 63),
                Value::Real(x) => Value::Int(if x.is_sign_negative() { -1 } else { 0 }),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Round | Xop::Floor | Xop::Ceil | Xop::Trunc => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(_) => value,
                Value::Real(x) => Value::Real(match xop {
                    Xop::Round => x.round(),
                    Xop::Floor => x.floor(),
                    Xop::Ceil => x.ceil(),
                    _ => x.trunc(),
                }),
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Iround | Xop::Ifloor | Xop::Iceil | Xop::Itrunc => {
            let value = top_value(ctx)?;
            let result = match value {
                Value::Int(_) => value,
                Value::Real(x) => real_to_integer(
                    sloc,
                    match xop {
                        Xop::Iround => x.round(),
                        Xop::Ifloor => x.floor(),
                        Xop::Iceil => x.ceil(),
                        _ => x.trunc(),
                    },
                )?,
                other => return Err(type_error(sloc, xop, &[&other])),
            };
            set_result(ctx, assign, result)
        }
        #[allow(clippy::cast_sign_loss)]
        Xop::Lzcnt | Xop::Tzcnt | Xop::Popcnt => {
            let value = top_value(ctx)?;
            let Value::Int(x) = value else {
                return Err(type_error(sloc, xop, &[&value]));
            };
            let bits = x as u64;
            let result = match xop {
                Xop::Lzcnt => bits.leading_zeros(),
                Xop::Tzcnt => bits.trailing_zeros(),
                _ => bits.count_ones(),
            };
            set_result(ctx, assign, Value::Int(i64::from(result)))
        }

        // Comparisons.
        Xop::CmpEq | Xop::CmpNe | Xop::CmpUn => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let comparison = lhs.compare(&rhs);
            let result = match xop {
                Xop::CmpEq => comparison == Compare::Equal,
                Xop::CmpNe => comparison != Compare::Equal,
                _ => comparison == Compare::Unordered,
            };
            set_result(ctx, assign, Value::Bool(result))
        }
        Xop::CmpLt | Xop::CmpGt | Xop::CmpLte | Xop::CmpGte => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let comparison = compare_total(sloc, &lhs, &rhs)?;
            let result = match xop {
                Xop::CmpLt => comparison == Compare::Less,
                Xop::CmpGt => comparison == Compare::Greater,
                Xop::CmpLte => comparison != Compare::Greater,
                _ => comparison != Compare::Less,
            };
            set_result(ctx, assign, Value::Bool(result))
        }
        Xop::Cmp3way => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match lhs.compare(&rhs) {
                Compare::Unordered => Value::from("[unordered]"),
                Compare::Less => Value::Int(-1),
                Compare::Equal => Value::Int(0),
                Compare::Greater => Value::Int(1),
            };
            set_result(ctx, assign, result)
        }

        // Additive and multiplicative operators.
        Xop::Add => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Bool(x), Value::Bool(y)) => Value::Bool(x | y),
                (Value::Int(x), Value::Int(y)) => {
                    checked_int(sloc, "addition", *x, *y, x.checked_add(*y))?
                }
                (Value::Int(_) | Value::Real(_), Value::Int(_) | Value::Real(_)) => {
                    Value::Real(lhs.as_real().expect("numeric") + rhs.as_real().expect("numeric"))
                }
                (Value::Str(x), Value::Str(y)) => {
                    let mut out = x.clone();
                    out.push_str(y);
                    Value::Str(out)
                }
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Sub => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Bool(x), Value::Bool(y)) => Value::Bool(x ^ y),
                (Value::Int(x), Value::Int(y)) => {
                    checked_int(sloc, "subtraction", *x, *y, x.checked_sub(*y))?
                }
                (Value::Int(_) | Value::Real(_), Value::Int(_) | Value::Real(_)) => {
                    Value::Real(lhs.as_real().expect("numeric") - rhs.as_real().expect("numeric"))
                }
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Mul => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Bool(x), Value::Bool(y)) => Value::Bool(x & y),
                (Value::Int(x), Value::Int(y)) => {
                    checked_int(sloc, "multiplication", *x, *y, x.checked_mul(*y))?
                }
                (Value::Int(_) | Value::Real(_), Value::Int(_) | Value::Real(_)) => {
                    Value::Real(lhs.as_real().expect("numeric") * rhs.as_real().expect("numeric"))
                }
                (Value::Str(text), Value::Int(count)) => repeat_string(sloc, text, *count)?,
                (Value::Int(count), Value::Str(text)) => repeat_string(sloc, text, *count)?,
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }
        Xop::Div | Xop::Mod => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Int(x), Value::Int(y)) => {
                    if *y == 0 {
                        return Err(RuntimeError::native(
                            sloc.clone(),
                            format!("integer division by zero (operands were `{x}` and `{y}`)"),
                        ));
                    }
                    let quotient = if xop == Xop::Div {
                        x.checked_div(*y)
                    } else {
                        x.checked_rem(*y)
                    };
                    checked_int(sloc, "division", *x, *y, quotient)?
                }
                (Value::Int(_) | Value::Real(_), Value::Int(_) | Value::Real(_)) => {
                    let x = lhs.as_real().expect("numeric");
                    let y = rhs.as_real().expect("numeric");
                    Value::Real(if xop == Xop::Div { x / y } else { x % y })
                }
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }

        // Shifts.
        Xop::Sll | Xop::Srl | Xop::Sla | Xop::Sra => {
            let rhs = pop_value(ctx)?;
            let count = shift_count(sloc, &rhs)?;
            let lhs = top_value(ctx)?;
            let result = match &lhs {
                Value::Int(x) => shift_integer(sloc, *x, count, xop)?,
                Value::Str(text) => shift_string(sloc, text, count, xop)?,
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }

        // Bitwise operators.
        Xop::Andb | Xop::Orb | Xop::Xorb => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Bool(x), Value::Bool(y)) => Value::Bool(match xop {
                    Xop::Andb => x & y,
                    Xop::Orb => x | y,
                    _ => x ^ y,
                }),
                (Value::Int(x), Value::Int(y)) => Value::Int(match xop {
                    Xop::Andb => x & y,
                    Xop::Orb => x | y,
                    _ => x ^ y,
                }),
                (Value::Str(x), Value::Str(y)) => bitwise_string(sloc, x, y, xop)?,
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }

        // Fused multiply-add over reals.
        Xop::Fma => {
            let z = pop_value(ctx)?;
            let y = pop_value(ctx)?;
            let x = top_value(ctx)?;
            match (x.as_real(), y.as_real(), z.as_real()) {
                (Some(x), Some(y), Some(z)) => {
                    set_result(ctx, assign, Value::Real(x.mul_add(y, z)))
                }
                _ => Err(type_error(sloc, xop, &[&x, &y, &z])),
            }
        }

        // Wrapping integer arithmetic.
        Xop::Addm | Xop::Subm | Xop::Mulm => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Int(x), Value::Int(y)) => Value::Int(match xop {
                    Xop::Addm => x.wrapping_add(*y),
                    Xop::Subm => x.wrapping_sub(*y),
                    _ => x.wrapping_mul(*y),
                }),
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }

        // Saturating arithmetic; reals fall back to the plain
        // operators.
        Xop::Adds | Xop::Subs | Xop::Muls => {
            let rhs = pop_value(ctx)?;
            let lhs = top_value(ctx)?;
            let result = match (&lhs, &rhs) {
                (Value::Int(x), Value::Int(y)) => Value::Int(match xop {
                    Xop::Adds => x.saturating_add(*y),
                    Xop::Subs => x.saturating_sub(*y),
                    _ => x.saturating_mul(*y),
                }),
                (Value::Int(_) | Value::Real(_), Value::Int(_) | Value::Real(_)) => {
                    let x = lhs.as_real().expect("numeric");
                    let y = rhs.as_real().expect("numeric");
                    Value::Real(match xop {
                        Xop::Adds => x + y,
                        Xop::Subs => x - y,
                        _ => x * y,
                    })
                }
                _ => return Err(type_error(sloc, xop, &[&lhs, &rhs])),
            };
            set_result(ctx, assign, result)
        }
    }
}
