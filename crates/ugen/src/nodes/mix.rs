use std::sync::Arc;

use crate::config::MAX_INPUTS;
use crate::context::Block;
use crate::kernel::{Kernel, KernelNode, KernelStatus, Signal};
use crate::node::{ConstantNode, NodeRef};
use crate::nodes::rate_conversion::conform;
use crate::rate::Rate;
use crate::ugen::UGen;

#[derive(Debug)]
struct SumKernel;

impl Kernel for SumKernel {
    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        output.fill(0.0);
        for input in inputs {
            for (i, o) in output.iter_mut().enumerate() {
                *o += input.at(i);
            }
        }
        KernelStatus::Running
    }
}

fn sum_node(rate: Rate, inputs: impl IntoIterator<Item = NodeRef>, allow_auto_delete: bool) -> NodeRef {
    let node = KernelNode::new(rate, inputs, SumKernel);
    if allow_auto_delete {
        Arc::new(node)
    } else {
        Arc::new(node.outliving_inputs())
    }
}

/// Sum nodes into one, as a tree if there are more than a single node can read.
fn sum_nodes(nodes: &[NodeRef], allow_auto_delete: bool) -> NodeRef {
    let constant: f32 = nodes.iter().filter_map(|n| n.constant_value()).sum();
    let varying = nodes
        .iter()
        .filter(|n| !n.is_constant())
        .cloned()
        .collect::<Vec<_>>();

    if varying.is_empty() {
        return Arc::new(ConstantNode::new(constant));
    }

    let mut level = varying;
    while level.len() > 1 {
        let rate = Rate::combine(level.iter().map(|n| n.rate()));
        level = level
            .chunks(MAX_INPUTS)
            .map(|chunk| {
                let inputs = chunk.iter().map(|n| conform(n, rate));
                sum_node(rate, inputs, allow_auto_delete)
            })
            .collect();
    }

    let root = level.remove(0);
    if constant == 0.0 {
        return root;
    }

    let offset: NodeRef = Arc::new(ConstantNode::new(constant));
    sum_node(root.rate(), [root, offset], allow_auto_delete)
}

/// Sum every channel into one.
///
/// With `allow_auto_delete` the sum finishes as soon as any input does, like every other node.  Without it the sum
/// keeps going: finished inputs drop out of the graph at the next [UGen::prepare_for_block] and the rest play on.
pub fn mix(input: &UGen, allow_auto_delete: bool) -> UGen {
    UGen::from_node(sum_nodes(input.nodes(), allow_auto_delete))
}

/// Sum several handles channel by channel.  The result is as wide as the widest, and narrower handles wrap.
///
/// `allow_auto_delete` is as for [mix].  Voices are usually mixed without it, so that one voice finishing doesn't
/// take the others down too.
pub fn mix_array(inputs: &[UGen], allow_auto_delete: bool) -> UGen {
    let channels = inputs.iter().map(|i| i.channel_count()).max().unwrap_or(1);
    UGen::from_nodes((0..channels).map(|c| {
        let column = inputs.iter().map(|i| i.node(c).clone()).collect::<Vec<_>>();
        sum_nodes(&column, allow_auto_delete)
    }))
}
