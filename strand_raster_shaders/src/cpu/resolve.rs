// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use glam::Vec4;
use smallvec::SmallVec;
use strand_raster_encoding::{ConfigUniform, FragmentRecord, HEAD_EMPTY, RESOLVE_WG};

use super::util::{pack4x8unorm, unpack4x8unorm};
use super::{CpuBinding, CpuTexture};

/// Composites each pixel's fragment list front to back over the base color.
///
/// At most `max_list_depth` fragments are walked. Fragments are inserted at
/// the head, so a truncated walk keeps the most recently appended ones.
fn raster_resolve_main(
    n_wg: u32,
    config: &ConfigUniform,
    head_pointers: &[u32],
    fragments: &[FragmentRecord],
    target: &mut CpuTexture,
) {
    let width = config.target_width.min(target.width as u32);
    let height = config.target_height.min(target.height as u32);
    let wg_x = config.target_width.div_ceil(RESOLVE_WG).max(1);
    let base = unpack4x8unorm(config.base_color);
    let mut list: SmallVec<[FragmentRecord; 16]> = SmallVec::new();
    for wg in 0..n_wg {
        let x0 = (wg % wg_x) * RESOLVE_WG;
        let y0 = (wg / wg_x) * RESOLVE_WG;
        for y in y0..(y0 + RESOLVE_WG).min(height) {
            for x in x0..(x0 + RESOLVE_WG).min(width) {
                list.clear();
                let mut ix = head_pointers[(y * config.target_width + x) as usize];
                while ix != HEAD_EMPTY && (list.len() as u32) < config.max_list_depth {
                    let Some(fragment) = fragments.get(ix as usize) else {
                        break;
                    };
                    list.push(*fragment);
                    ix = fragment.next;
                }
                list.sort_by(|a, b| a.depth.total_cmp(&b.depth));

                let mut accum = Vec4::ZERO;
                for fragment in &list {
                    let alpha = fragment.color[3] * fragment.coverage;
                    let rgb = Vec4::from_array(fragment.color).with_w(1.0);
                    accum += (1.0 - accum.w) * alpha * rgb;
                }
                let color = accum + (1.0 - accum.w) * base;
                target.pixels[(y * target.width as u32 + x) as usize] = pack4x8unorm(color);
            }
        }
    }
}

pub fn raster_resolve(n_wg: u32, resources: &[CpuBinding<'_>]) {
    let config = resources[0].as_typed();
    let head_pointers = resources[1].as_slice();
    let fragments = resources[2].as_slice();
    let mut target = resources[3].as_tex_mut();
    raster_resolve_main(n_wg, &config, &head_pointers, &fragments, &mut target);
}
