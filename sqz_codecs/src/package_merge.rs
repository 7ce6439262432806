//! Length-limited optimal prefix-code lengths via the package-merge
//! algorithm of Larmore & Hirschberg ("A Fast Algorithm for Optimal
//! Length-Limited Huffman Codes"), in its O(n)-space form: a recursive
//! divide over depth that, at each step, only tracks the number of nodes at
//! the current mid level (`midct`) and the cumulative width contributed by
//! nodes below it (`hiwidth`).
//!
//! Widths are scaled by 2^max_depth so all arithmetic stays integral:
//! an item packaged at `level` contributes width 2^level, where
//! `level = max_depth - depth`.

use anyhow::{bail, Result};

type Weight = u64;
type Width = u128;

#[derive(Clone, Copy, Default)]
struct Pack {
    weight: Weight,
    /// Number of nodes in this package at the current mid level.
    midct: usize,
    /// Cumulative width of nodes in this package at levels below mid.
    hiwidth: Width,
}

#[derive(Clone, Copy)]
struct Item {
    weight: Weight,
    index: usize,
}

struct Context {
    items: Vec<Item>,
    nr_nodes_per_level: Vec<usize>,
}

/// Compute optimal code lengths for `weights`, none exceeding `max_depth`.
///
/// Zero-weight symbols get length 0. A single non-zero weight gets length 1.
/// `depths` must have the same length as `weights`. `max_depth` may be at
/// most 64, and `2^max_depth` must be able to accommodate the number of
/// non-zero weights, or the width consistency check fails.
pub fn package_merge(weights: &[Weight], max_depth: u32, depths: &mut [u8]) -> Result<()> {
    assert_eq!(weights.len(), depths.len());
    assert!(max_depth >= 1 && max_depth <= 64);

    let mut items = Vec::with_capacity(weights.len());
    for (index, &weight) in weights.iter().enumerate() {
        depths[index] = 0;
        if weight != 0 {
            items.push(Item { weight, index });
        }
    }

    match items.len() {
        0 => return Ok(()),
        1 => {
            // a lone code still gets one bit so the decode tree stays full
            depths[items[0].index] = 1;
            return Ok(());
        }
        _ => {}
    }

    items.sort_by_key(|item| (item.weight, item.index));

    let nr_items = items.len();
    let mut ctx = Context {
        items,
        nr_nodes_per_level: vec![0; max_depth as usize],
    };

    let target_width = (nr_items as Width - 1) << max_depth;
    package_merge_impl(&mut ctx, max_depth - 1, 0, target_width, 0, nr_items)?;
    calc_depths_from_nodes_per_level(&ctx, max_depth, depths);
    Ok(())
}

/// Number of nodes at each level defines the depth of each item: an item is
/// counted once per level it appears at, so cumulative per-level counts are
/// monotone and the i-th lightest item's depth falls out of the differences.
fn calc_depths_from_nodes_per_level(ctx: &Context, max_depth: u32, depths: &mut [u8]) {
    let nr_items = ctx.items.len();
    let max_level = max_depth - 1;

    let mut i = 0;
    while i < ctx.nr_nodes_per_level[0] {
        depths[ctx.items[i].index] = max_depth as u8;
        i += 1;
    }

    for level in 1..=max_level {
        if i >= nr_items {
            break;
        }
        let nr_nodes_here = ctx.nr_nodes_per_level[level as usize];
        let nr_nodes_below = ctx.nr_nodes_per_level[level as usize - 1];
        debug_assert!(nr_nodes_here >= nr_nodes_below);

        let mut nr_nodes_here_only = nr_nodes_here - nr_nodes_below;
        while nr_nodes_here_only > 0 && i < nr_items {
            depths[ctx.items[i].index] = (max_depth - level) as u8;
            nr_nodes_here_only -= 1;
            i += 1;
        }
    }
}

/// Recursive divide over the level range `[0, max_level]` for the item
/// segment `[item_idx, item_idx + nr_items)` carrying `width` of demand.
fn package_merge_impl(
    ctx: &mut Context,
    max_level: u32,
    level_shift: u32,
    width: Width,
    item_idx: usize,
    nr_items: usize,
) -> Result<()> {
    let (midct, hiwidth) = linear_package_merge(ctx, max_level, width, item_idx, nr_items)?;
    debug_assert!(hiwidth <= width);

    let mid_level = max_level / 2;
    ctx.nr_nodes_per_level[(mid_level + level_shift) as usize] = item_idx + midct;

    if mid_level != 0 {
        package_merge_impl(ctx, mid_level - 1, level_shift, hiwidth, item_idx, midct)?;
    }

    if mid_level != max_level {
        let midwidth =
            midct as Width * (((1 as Width) << (max_level + 1 - mid_level)) - 1);
        let lowidth = (((width - hiwidth) >> mid_level) - midwidth) >> 1;
        debug_assert_eq!(
            width,
            hiwidth + (lowidth << (1 + mid_level)) + (midwidth << mid_level)
        );
        package_merge_impl(
            ctx,
            max_level - mid_level - 1,
            level_shift + mid_level + 1,
            lowidth,
            item_idx + midct,
            nr_items - midct,
        )?;
    }
    Ok(())
}

/// One package-merge sweep over levels `0..max_level`, pulling packages out
/// whenever the width demands one at the current level, and reporting only
/// the mid-level node count and below-mid width of everything consumed.
fn linear_package_merge(
    ctx: &Context,
    max_level: u32,
    mut width: Width,
    item_idx: usize,
    nr_items: usize,
) -> Result<(usize, Width)> {
    if nr_items == 0 {
        return Ok((0, 0));
    }

    let mid_level = max_level / 2;
    let items = &ctx.items[item_idx..item_idx + nr_items];

    let mut midct: usize = 0;
    let mut hiwidth: Width = 0;
    let mut packs: Vec<Pack> = items
        .iter()
        .map(|item| package_item(item.weight, 0, mid_level))
        .collect();

    for level in 0..max_level {
        if width == 0 || packs.is_empty() {
            break;
        }

        let level_width = (1 as Width) << level;
        let mut start = 0;
        if width & level_width != 0 {
            width -= level_width;
            midct += packs[0].midct;
            hiwidth += packs[0].hiwidth;
            start = 1;
        }

        // package the survivors pair-wise, then merge in fresh packages of
        // every item at the next level, keeping weight order stable
        let mut paired = Vec::with_capacity(packs.len() / 2 + nr_items);
        for pair in packs[start..].chunks_exact(2) {
            paired.push(combine_packs(&pair[0], &pair[1]));
        }
        debug_assert!(paired.windows(2).all(|w| w[0].weight <= w[1].weight));

        packs = merge_by_weight(
            paired,
            items
                .iter()
                .map(|item| package_item(item.weight, level + 1, mid_level)),
        );
    }

    let nr_packs_needed = (width >> max_level) as usize;
    if width != (nr_packs_needed as Width) << max_level {
        bail!("no solution for the given width and set of weights");
    }
    if nr_packs_needed > packs.len() {
        bail!("insufficient amount of packages formed");
    }

    for pack in &packs[..nr_packs_needed] {
        midct += pack.midct;
        hiwidth += pack.hiwidth;
    }

    debug_assert!(midct <= nr_items);
    Ok((midct, hiwidth))
}

#[inline]
fn package_item(weight: Weight, level: u32, mid_level: u32) -> Pack {
    Pack {
        weight,
        midct: usize::from(level == mid_level),
        hiwidth: if level < mid_level { (1 as Width) << level } else { 0 },
    }
}

#[inline]
fn combine_packs(a: &Pack, b: &Pack) -> Pack {
    Pack {
        weight: a.weight + b.weight,
        midct: a.midct + b.midct,
        hiwidth: a.hiwidth + b.hiwidth,
    }
}

/// Stable merge of two weight-sorted runs; elements of `a` precede
/// equal-weight elements of `b`.
fn merge_by_weight(a: Vec<Pack>, b: impl Iterator<Item = Pack>) -> Vec<Pack> {
    let mut out = Vec::with_capacity(a.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.peekable();
    loop {
        match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => {
                if y.weight < x.weight {
                    out.push(b.next().unwrap());
                } else {
                    out.push(a.next().unwrap());
                }
            }
            (Some(_), None) => out.push(a.next().unwrap()),
            (None, Some(_)) => out.push(b.next().unwrap()),
            (None, None) => break,
        }
    }
    out
}
