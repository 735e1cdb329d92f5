//! Arithmetic between [UGen]s.
//!
//! Everything expands per channel.  Constants fold at build time, and an operation with one constant operand becomes
//! a scale and offset of the other.
use std::ops::*;
use std::sync::Arc;

use crate::context::Block;
use crate::kernel::{Kernel, KernelNode, KernelStatus, Signal};
use crate::node::{ConstantNode, NodeRef};
use crate::nodes::rate_conversion::conform;
use crate::rate::Rate;
use crate::ugen::UGen;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
}

impl BinaryOp {
    #[inline(always)]
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => safe_div(a, b),
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Pow => a.powf(b),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum UnaryOp {
    Abs,
    Squared,
    Sqrt,
}

impl UnaryOp {
    #[inline(always)]
    fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Abs => x.abs(),
            UnaryOp::Squared => x * x,
            UnaryOp::Sqrt => x.max(0.0).sqrt(),
        }
    }
}

/// Division by zero gives zero.
#[inline(always)]
fn safe_div(a: f32, b: f32) -> f32 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

#[inline(always)]
fn fill_binary(inputs: &[Signal<'_>], output: &mut [f32], op: impl Fn(f32, f32) -> f32) {
    let (a, b) = (inputs[0], inputs[1]);
    for (i, o) in output.iter_mut().enumerate() {
        *o = op(a.at(i), b.at(i));
    }
}

#[derive(Debug)]
struct BinaryKernel {
    op: BinaryOp,
}

impl Kernel for BinaryKernel {
    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        // Dispatch once per block, not per sample.
        match self.op {
            BinaryOp::Add => fill_binary(inputs, output, |a, b| a + b),
            BinaryOp::Sub => fill_binary(inputs, output, |a, b| a - b),
            BinaryOp::Mul => fill_binary(inputs, output, |a, b| a * b),
            BinaryOp::Div => fill_binary(inputs, output, safe_div),
            BinaryOp::Min => fill_binary(inputs, output, f32::min),
            BinaryOp::Max => fill_binary(inputs, output, f32::max),
            BinaryOp::Pow => fill_binary(inputs, output, f32::powf),
        }
        KernelStatus::Running
    }
}

/// `x * scale + offset`.
#[derive(Debug)]
struct AffineKernel {
    scale: f32,
    offset: f32,
}

impl Kernel for AffineKernel {
    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let input = inputs[0];
        for (i, o) in output.iter_mut().enumerate() {
            *o = input.at(i) * self.scale + self.offset;
        }
        KernelStatus::Running
    }
}

#[derive(Debug)]
struct UnaryKernel {
    op: UnaryOp,
}

impl Kernel for UnaryKernel {
    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let input = inputs[0];
        match self.op {
            UnaryOp::Abs => output.iter_mut().enumerate().for_each(|(i, o)| *o = input.at(i).abs()),
            UnaryOp::Squared => output.iter_mut().enumerate().for_each(|(i, o)| {
                let x = input.at(i);
                *o = x * x;
            }),
            UnaryOp::Sqrt => output
                .iter_mut()
                .enumerate()
                .for_each(|(i, o)| *o = input.at(i).max(0.0).sqrt()),
        }
        KernelStatus::Running
    }
}

fn constant(value: f32) -> NodeRef {
    Arc::new(ConstantNode::new(value))
}

fn affine(node: &NodeRef, scale: f32, offset: f32) -> NodeRef {
    if scale == 0.0 {
        return constant(offset);
    }
    if scale == 1.0 && offset == 0.0 {
        return node.clone();
    }
    Arc::new(KernelNode::new(
        node.rate(),
        [node.clone()],
        AffineKernel { scale, offset },
    ))
}

fn binary_node(op: BinaryOp, a: &NodeRef, b: &NodeRef) -> NodeRef {
    match (op, a.constant_value(), b.constant_value()) {
        (_, Some(x), Some(y)) => constant(op.apply(x, y)),
        (BinaryOp::Add, Some(k), None) => affine(b, 1.0, k),
        (BinaryOp::Add, None, Some(k)) => affine(a, 1.0, k),
        (BinaryOp::Sub, Some(k), None) => affine(b, -1.0, k),
        (BinaryOp::Sub, None, Some(k)) => affine(a, 1.0, -k),
        (BinaryOp::Mul, Some(k), None) => affine(b, k, 0.0),
        (BinaryOp::Mul, None, Some(k)) => affine(a, k, 0.0),
        (BinaryOp::Div, None, Some(k)) => affine(a, safe_div(1.0, k), 0.0),
        _ => {
            let rate = Rate::combine(
                [a, b]
                    .into_iter()
                    .filter(|n| !n.is_constant())
                    .map(|n| n.rate()),
            );
            Arc::new(KernelNode::new(
                rate,
                [conform(a, rate), conform(b, rate)],
                BinaryKernel { op },
            ))
        }
    }
}

fn unary_node(op: UnaryOp, a: &NodeRef) -> NodeRef {
    match a.constant_value() {
        Some(x) => constant(op.apply(x)),
        None => Arc::new(KernelNode::new(a.rate(), [a.clone()], UnaryKernel { op })),
    }
}

pub(crate) fn binary(op: BinaryOp, a: &UGen, b: &UGen) -> UGen {
    let channels = a.channel_count().max(b.channel_count());
    UGen::from_nodes((0..channels).map(|c| binary_node(op, a.node(c), b.node(c))))
}

fn unary(op: UnaryOp, a: &UGen) -> UGen {
    UGen::from_nodes(a.nodes().iter().map(|n| unary_node(op, n)))
}

impl UGen {
    pub fn min(&self, other: impl Into<UGen>) -> UGen {
        binary(BinaryOp::Min, self, &other.into())
    }

    pub fn max(&self, other: impl Into<UGen>) -> UGen {
        binary(BinaryOp::Max, self, &other.into())
    }

    pub fn pow(&self, exponent: impl Into<UGen>) -> UGen {
        binary(BinaryOp::Pow, self, &exponent.into())
    }

    pub fn abs(&self) -> UGen {
        unary(UnaryOp::Abs, self)
    }

    pub fn squared(&self) -> UGen {
        unary(UnaryOp::Squared, self)
    }

    /// Negative inputs give zero.
    pub fn sqrt(&self) -> UGen {
        unary(UnaryOp::Sqrt, self)
    }

    /// `self * mul + add`.
    pub fn mul_add(&self, mul: impl Into<UGen>, add: impl Into<UGen>) -> UGen {
        let scaled = binary(BinaryOp::Mul, self, &mul.into());
        binary(BinaryOp::Add, &scaled, &add.into())
    }
}

macro_rules! impl_binop {
    ($trait: ident, $method: ident, $op: expr) => {
        impl $trait<&UGen> for &UGen {
            type Output = UGen;

            fn $method(self, rhs: &UGen) -> UGen {
                binary($op, self, rhs)
            }
        }

        impl $trait<UGen> for UGen {
            type Output = UGen;

            fn $method(self, rhs: UGen) -> UGen {
                binary($op, &self, &rhs)
            }
        }

        impl $trait<&UGen> for UGen {
            type Output = UGen;

            fn $method(self, rhs: &UGen) -> UGen {
                binary($op, &self, rhs)
            }
        }

        impl $trait<UGen> for &UGen {
            type Output = UGen;

            fn $method(self, rhs: UGen) -> UGen {
                binary($op, self, &rhs)
            }
        }

        impl $trait<f32> for UGen {
            type Output = UGen;

            fn $method(self, rhs: f32) -> UGen {
                binary($op, &self, &UGen::constant(rhs))
            }
        }

        impl $trait<f32> for &UGen {
            type Output = UGen;

            fn $method(self, rhs: f32) -> UGen {
                binary($op, self, &UGen::constant(rhs))
            }
        }

        impl $trait<UGen> for f32 {
            type Output = UGen;

            fn $method(self, rhs: UGen) -> UGen {
                binary($op, &UGen::constant(self), &rhs)
            }
        }

        impl $trait<&UGen> for f32 {
            type Output = UGen;

            fn $method(self, rhs: &UGen) -> UGen {
                binary($op, &UGen::constant(self), rhs)
            }
        }
    };
}

impl_binop!(Add, add, BinaryOp::Add);
impl_binop!(Sub, sub, BinaryOp::Sub);
impl_binop!(Mul, mul, BinaryOp::Mul);
impl_binop!(Div, div, BinaryOp::Div);

impl Neg for &UGen {
    type Output = UGen;

    fn neg(self) -> UGen {
        UGen::from_nodes(self.nodes().iter().map(|n| match n.constant_value() {
            Some(x) => constant(-x),
            None => affine(n, -1.0, 0.0),
        }))
    }
}

impl Neg for UGen {
    type Output = UGen;

    fn neg(self) -> UGen {
        -&self
    }
}
