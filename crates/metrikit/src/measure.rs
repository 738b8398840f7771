//! Metric-space edge length and element quality.
//!
//! The ratio of an edge is its length measured in the Riemannian metric;
//! the adaptation loop drives every edge toward ratio 1. Quality is a
//! shape measure in (-inf, 1], 1 for a metric-regular simplex, negative
//! once an element inverts. Two interchangeable quality definitions are
//! provided; the active one is a node-table setting.

use crate::error::{Error, Result};
use crate::geometry::{self, divisible};
use crate::metric::{self, SymTensor};
use crate::node::{NodeTable, QualityMethod, RatioMethod};

/* 36 / 3^(1/3) */
const TET_QUALITY_SCALE: f64 = 24.9610058766228;

pub trait MetricMeasure {
    /// Edge length under the metric. Zero-length edges measure 0.
    fn ratio(&self, node0: usize, node1: usize) -> Result<f64>;
    /// Ratio and its gradient with respect to `node0`'s position.
    fn dratio_dnode0(&self, node0: usize, node1: usize) -> Result<(f64, [f64; 3])>;
    fn tet_quality(&self, nodes: &[usize; 4]) -> Result<f64>;
    fn tet_dquality_dnode0(&self, nodes: &[usize; 4]) -> Result<(f64, [f64; 3])>;
    fn tri_quality(&self, nodes: &[usize; 3]) -> Result<f64>;
    fn tri_dquality_dnode0(&self, nodes: &[usize; 3]) -> Result<(f64, [f64; 3])>;
    /// Triangle area scaled into the metric, normalized so a unit
    /// metric-equilateral triangle measures 1.
    fn tri_metric_area(&self, nodes: &[usize; 3]) -> Result<f64>;
}

fn direction(nodes: &NodeTable, node0: usize, node1: usize) -> Result<Option<[f64; 3]>> {
    if !nodes.valid(node0) || !nodes.valid(node1) {
        return Err(Error::Invalid("ratio of invalid node"));
    }
    let dir = geometry::sub(nodes.xyz(node1), nodes.xyz(node0));
    let length = geometry::norm(&dir);
    if dir.iter().any(|&d| !divisible(d, length)) {
        return Ok(None);
    }
    Ok(Some(dir))
}

fn ratio_log_quadrature(nodes: &NodeTable, node0: usize, node1: usize) -> f64 {
    // one-point midpoint rule
    let dir = geometry::sub(nodes.xyz(node1), nodes.xyz(node0));
    let mlog = metric::weight(&nodes.log_metric(node0), &nodes.log_metric(node1), 0.5);
    mlog.exp().sqrt_vt_m_v(&dir)
}

impl MetricMeasure for NodeTable {
    fn ratio(&self, node0: usize, node1: usize) -> Result<f64> {
        let Some(dir) = direction(self, node0, node1)? else {
            return Ok(0.0);
        };
        if self.ratio_method == RatioMethod::Quadrature {
            return Ok(ratio_log_quadrature(self, node0, node1));
        }

        let ratio0 = self.metric(node0).sqrt_vt_m_v(&dir);
        let ratio1 = self.metric(node1).sqrt_vt_m_v(&dir);

        /* Loseille Lohner IMR 18 (2009) pg 613 */
        /* Alauzet Finite Elements in Analysis and Design 46 (2010) pg 185 */
        if ratio0 < 1.0e-12 || ratio1 < 1.0e-12 {
            return Ok(ratio0.min(ratio1));
        }
        let r_min = ratio0.min(ratio1);
        let r_max = ratio0.max(ratio1);
        let r = r_min / r_max;
        if (r - 1.0).abs() < 1.0e-12 {
            return Ok(0.5 * (ratio0 + ratio1));
        }
        Ok(r_min * (r - 1.0) / (r * r.ln()))
    }

    fn dratio_dnode0(&self, node0: usize, node1: usize) -> Result<(f64, [f64; 3])> {
        let Some(dir) = direction(self, node0, node1)? else {
            return Ok((0.0, [0.0; 3]));
        };
        if self.ratio_method == RatioMethod::Quadrature {
            let mlog = metric::weight(&self.log_metric(node0), &self.log_metric(node1), 0.5);
            let (ratio, d_dir) = mlog.exp().sqrt_vt_m_v_deriv(&dir);
            // node0 moves against the direction vector
            return Ok((ratio, [-d_dir[0], -d_dir[1], -d_dir[2]]));
        }

        let (ratio0, d0) = self.metric(node0).sqrt_vt_m_v_deriv(&dir);
        let d_ratio0 = [-d0[0], -d0[1], -d0[2]];
        let (ratio1, d1) = self.metric(node1).sqrt_vt_m_v_deriv(&dir);
        let d_ratio1 = [-d1[0], -d1[1], -d1[2]];

        if ratio0 < 1.0e-12 || ratio1 < 1.0e-12 {
            return Ok(if ratio0 < ratio1 {
                (ratio0, d_ratio0)
            } else {
                (ratio1, d_ratio1)
            });
        }
        let (r_min, d_r_min, r_max, d_r_max) = if ratio0 < ratio1 {
            (ratio0, d_ratio0, ratio1, d_ratio1)
        } else {
            (ratio1, d_ratio1, ratio0, d_ratio0)
        };
        let r = r_min / r_max;
        let mut d_r = [0.0; 3];
        for i in 0..3 {
            d_r[i] = (d_r_min[i] * r_max - r_min * d_r_max[i]) / r_max / r_max;
        }
        if (r - 1.0).abs() < 1.0e-12 {
            let mut d_ratio = [0.0; 3];
            for i in 0..3 {
                d_ratio[i] = 0.5 * (d_r_min[i] + d_r_max[i]);
            }
            return Ok((0.5 * (r_min + r_max), d_ratio));
        }
        let r_log_r = r * r.ln();
        let ratio = r_min * (r - 1.0) / r_log_r;
        let mut d_ratio = [0.0; 3];
        for i in 0..3 {
            d_ratio[i] = ((r_min * d_r[i] + d_r_min[i] * (r - 1.0)) * r_log_r
                - r_min * (r - 1.0) * (d_r[i] + d_r[i] * r.ln()))
                / r_log_r
                / r_log_r;
        }
        Ok((ratio, d_ratio))
    }

    fn tet_quality(&self, nodes: &[usize; 4]) -> Result<f64> {
        match self.quality_method {
            QualityMethod::Epic => tet_epic_quality(self, nodes),
            QualityMethod::Jac => tet_jac_quality(self, nodes),
        }
    }

    fn tet_dquality_dnode0(&self, nodes: &[usize; 4]) -> Result<(f64, [f64; 3])> {
        match self.quality_method {
            QualityMethod::Epic => tet_epic_dquality(self, nodes),
            QualityMethod::Jac => tet_jac_dquality(self, nodes),
        }
    }

    fn tri_quality(&self, nodes: &[usize; 3]) -> Result<f64> {
        match self.quality_method {
            QualityMethod::Epic => tri_epic_quality(self, nodes),
            QualityMethod::Jac => tri_jac_quality(self, nodes),
        }
    }

    fn tri_dquality_dnode0(&self, nodes: &[usize; 3]) -> Result<(f64, [f64; 3])> {
        match self.quality_method {
            QualityMethod::Epic => tri_epic_dquality(self, nodes),
            QualityMethod::Jac => tri_jac_dquality(self, nodes),
        }
    }

    fn tri_metric_area(&self, nodes: &[usize; 3]) -> Result<f64> {
        let area = self.tri_area(nodes)?;
        let mlog = metric::average_log(&[
            self.log_metric(nodes[0]),
            self.log_metric(nodes[1]),
            self.log_metric(nodes[2]),
        ]);
        let det = mlog.exp().det();
        Ok(area * det.sqrt() * 4.0 / 3.0f64.sqrt())
    }
}

fn min_metric_det(nodes: &NodeTable, locals: &[usize]) -> f64 {
    locals
        .iter()
        .map(|&n| nodes.metric(n).det())
        .fold(f64::INFINITY, f64::min)
}

fn tet_edge_ratios(nodes: &NodeTable, n: &[usize; 4]) -> Result<[f64; 6]> {
    Ok([
        nodes.ratio(n[0], n[1])?,
        nodes.ratio(n[0], n[2])?,
        nodes.ratio(n[0], n[3])?,
        nodes.ratio(n[1], n[2])?,
        nodes.ratio(n[1], n[3])?,
        nodes.ratio(n[2], n[3])?,
    ])
}

fn tet_epic_quality(nodes: &NodeTable, n: &[usize; 4]) -> Result<f64> {
    let volume = nodes.tet_vol(n)?;
    if volume <= nodes.min_volume {
        return Ok(volume - nodes.min_volume);
    }
    let l = tet_edge_ratios(nodes, n)?;
    let min_det = min_metric_det(nodes, n);
    let volume_in_metric = min_det.sqrt() * volume;
    let num = volume_in_metric.powf(2.0 / 3.0);
    let denom: f64 = l.iter().map(|&r| r * r).sum();
    if divisible(num, denom) {
        Ok(TET_QUALITY_SCALE * num / denom)
    } else {
        Ok(-1.0)
    }
}

fn tet_epic_dquality(nodes: &NodeTable, n: &[usize; 4]) -> Result<(f64, [f64; 3])> {
    let (l0, d_l0) = nodes.dratio_dnode0(n[0], n[1])?;
    let (l1, d_l1) = nodes.dratio_dnode0(n[0], n[2])?;
    let (l2, d_l2) = nodes.dratio_dnode0(n[0], n[3])?;
    let l3 = nodes.ratio(n[1], n[2])?;
    let l4 = nodes.ratio(n[1], n[3])?;
    let l5 = nodes.ratio(n[2], n[3])?;

    let (volume, d_volume) = nodes.tet_dvol_dnode0(n)?;
    if volume <= nodes.min_volume {
        return Ok((volume - nodes.min_volume, d_volume));
    }
    let min_det = min_metric_det(nodes, n);
    let sqrt_det = min_det.sqrt();
    let volume_in_metric = sqrt_det * volume;

    let num = volume_in_metric.powf(2.0 / 3.0);
    let denom = l0 * l0 + l1 * l1 + l2 * l2 + l3 * l3 + l4 * l4 + l5 * l5;
    let mut d_num = [0.0; 3];
    let mut d_denom = [0.0; 3];
    for i in 0..3 {
        d_num[i] = 2.0 / 3.0 * volume_in_metric.powf(-1.0 / 3.0) * sqrt_det * d_volume[i];
        d_denom[i] = 2.0 * l0 * d_l0[i] + 2.0 * l1 * d_l1[i] + 2.0 * l2 * d_l2[i];
    }
    if divisible(num, denom) {
        let quality = TET_QUALITY_SCALE * num / denom;
        let mut d_quality = [0.0; 3];
        for i in 0..3 {
            d_quality[i] =
                TET_QUALITY_SCALE * (d_num[i] * denom - num * d_denom[i]) / denom / denom;
        }
        Ok((quality, d_quality))
    } else {
        Ok((-1.0, [0.0; 3]))
    }
}

fn tet_log_average(nodes: &NodeTable, n: &[usize]) -> SymTensor {
    let logs: Vec<SymTensor> = n.iter().map(|&local| nodes.log_metric(local)).collect();
    metric::average_log(&logs)
}

fn tet_edges(nodes: &NodeTable, n: &[usize; 4]) -> [[f64; 3]; 6] {
    let p: Vec<&[f64; 3]> = n.iter().map(|&local| nodes.xyz(local)).collect();
    [
        geometry::sub(p[1], p[0]),
        geometry::sub(p[2], p[0]),
        geometry::sub(p[3], p[0]),
        geometry::sub(p[2], p[1]),
        geometry::sub(p[3], p[1]),
        geometry::sub(p[3], p[2]),
    ]
}

fn tet_jac_quality(nodes: &NodeTable, n: &[usize; 4]) -> Result<f64> {
    let volume = nodes.tet_vol(n)?;
    if volume <= nodes.min_volume {
        return Ok(volume - nodes.min_volume);
    }
    let m = tet_log_average(nodes, n).exp();
    let l2: f64 = tet_edges(nodes, n).iter().map(|e| m.vt_m_v(e)).sum();
    let volume_in_metric = m.det().sqrt() * volume;
    let num = volume_in_metric.powf(2.0 / 3.0);
    if divisible(num, l2) {
        Ok(TET_QUALITY_SCALE * num / l2)
    } else {
        Ok(-1.0)
    }
}

fn tet_jac_dquality(nodes: &NodeTable, n: &[usize; 4]) -> Result<(f64, [f64; 3])> {
    let (volume, d_volume) = nodes.tet_dvol_dnode0(n)?;
    if volume <= nodes.min_volume {
        return Ok((volume - nodes.min_volume, d_volume));
    }
    let m = tet_log_average(nodes, n).exp();
    let edges = tet_edges(nodes, n);
    let l2: f64 = edges.iter().map(|e| m.vt_m_v(e)).sum();
    // only the three edges leaving node 0 move with it, each as -dv
    let mut d_l2 = [0.0; 3];
    for e in &edges[..3] {
        let (_, d_e) = m.vt_m_v_deriv(e);
        for i in 0..3 {
            d_l2[i] -= d_e[i];
        }
    }
    let det = m.det();
    let sqrt_det = det.sqrt();
    let volume_in_metric = sqrt_det * volume;
    let num = volume_in_metric.powf(2.0 / 3.0);
    let pow_vim = volume_in_metric.powf(-1.0 / 3.0);
    let mut d_num = [0.0; 3];
    for i in 0..3 {
        d_num[i] = 2.0 / 3.0 * pow_vim * sqrt_det * d_volume[i];
    }
    if divisible(num, l2) {
        let quality = TET_QUALITY_SCALE * num / l2;
        let mut d_quality = [0.0; 3];
        for i in 0..3 {
            d_quality[i] = TET_QUALITY_SCALE * (d_num[i] * l2 - num * d_l2[i]) / (l2 * l2);
        }
        Ok((quality, d_quality))
    } else {
        Ok((-1.0, [0.0; 3]))
    }
}

fn tri_epic_quality(nodes: &NodeTable, n: &[usize; 3]) -> Result<f64> {
    let l0 = nodes.ratio(n[0], n[1])?;
    let l1 = nodes.ratio(n[0], n[2])?;
    let l2 = nodes.ratio(n[1], n[2])?;
    let area = nodes.tri_area(n)?;
    let min_det = min_metric_det(nodes, n);
    let area_in_metric = min_det.powf(1.0 / 3.0) * area;
    let num = area_in_metric;
    let denom = l0 * l0 + l1 * l1 + l2 * l2;
    if divisible(num, denom) {
        Ok(4.0 / 3.0f64.sqrt() * 3.0 * num / denom)
    } else {
        Ok(-1.0)
    }
}

fn tri_epic_dquality(nodes: &NodeTable, n: &[usize; 3]) -> Result<(f64, [f64; 3])> {
    let (l0, d_l0) = nodes.dratio_dnode0(n[0], n[1])?;
    let (l1, d_l1) = nodes.dratio_dnode0(n[0], n[2])?;
    let l2 = nodes.ratio(n[1], n[2])?;
    let (area, d_area) =
        geometry::tri_darea_dnode0(nodes.xyz(n[0]), nodes.xyz(n[1]), nodes.xyz(n[2]));
    let min_det = min_metric_det(nodes, n);
    let scale = min_det.powf(1.0 / 3.0);

    let num = scale * area;
    let denom = l0 * l0 + l1 * l1 + l2 * l2;
    let mut d_num = [0.0; 3];
    let mut d_denom = [0.0; 3];
    for i in 0..3 {
        d_num[i] = scale * d_area[i];
        d_denom[i] = 2.0 * l0 * d_l0[i] + 2.0 * l1 * d_l1[i];
    }
    if divisible(num, denom) {
        let coef = 4.0 / 3.0f64.sqrt() * 3.0;
        let quality = coef * num / denom;
        let mut d_quality = [0.0; 3];
        for i in 0..3 {
            d_quality[i] = coef * (d_num[i] * denom - num * d_denom[i]) / denom / denom;
        }
        Ok((quality, d_quality))
    } else {
        Ok((-1.0, [0.0; 3]))
    }
}

fn tri_jac_quality(nodes: &NodeTable, n: &[usize; 3]) -> Result<f64> {
    let (_, mapped) = tri_mapped(nodes, n)?;
    let e0 = geometry::sub(&mapped[2], &mapped[1]);
    let e1 = geometry::sub(&mapped[0], &mapped[2]);
    let e2 = geometry::sub(&mapped[1], &mapped[0]);
    let normal = geometry::cross(&e2, &e0);
    let l2 = geometry::dot(&e0, &e0) + geometry::dot(&e1, &e1) + geometry::dot(&e2, &e2);
    let a = 0.5 * geometry::norm(&normal);
    if divisible(a, l2) {
        Ok(4.0 * 3.0f64.sqrt() * (a / l2))
    } else {
        Ok(-1.0)
    }
}

fn tri_mapped(nodes: &NodeTable, n: &[usize; 3]) -> Result<(nalgebra::Matrix3<f64>, [[f64; 3]; 3])> {
    let mlog = metric::average_log(&[
        nodes.log_metric(n[0]),
        nodes.log_metric(n[1]),
        nodes.log_metric(n[2]),
    ]);
    let jac = mlog.exp().jacobian()?;
    let mut mapped = [[0.0; 3]; 3];
    for (slot, &local) in mapped.iter_mut().zip(n) {
        let p = nodes.xyz(local);
        let v = jac * nalgebra::Vector3::new(p[0], p[1], p[2]);
        *slot = [v.x, v.y, v.z];
    }
    Ok((jac, mapped))
}

fn tri_jac_dquality(nodes: &NodeTable, n: &[usize; 3]) -> Result<(f64, [f64; 3])> {
    let (jac, mapped) = tri_mapped(nodes, n)?;
    let e1 = geometry::sub(&mapped[0], &mapped[2]);
    let e2 = geometry::sub(&mapped[1], &mapped[0]);
    let e0 = geometry::sub(&mapped[2], &mapped[1]);
    let l2 = geometry::dot(&e0, &e0) + geometry::dot(&e1, &e1) + geometry::dot(&e2, &e2);
    let (a, d_a) = geometry::tri_darea_dnode0(&mapped[0], &mapped[1], &mapped[2]);
    // only e1 and e2 move with the mapped node 0
    let d_l2 = [
        2.0 * (e1[0] - e2[0]),
        2.0 * (e1[1] - e2[1]),
        2.0 * (e1[2] - e2[2]),
    ];
    if !divisible(a, l2) {
        return Ok((-1.0, [0.0; 3]));
    }
    let coef = 4.0 * 3.0f64.sqrt();
    let quality = coef * (a / l2);
    let mut d_mapped = [0.0; 3];
    for i in 0..3 {
        d_mapped[i] = coef * (d_a[i] * l2 - a * d_l2[i]) / (l2 * l2);
    }
    // chain rule back through the metric mapping
    let g = jac.transpose() * nalgebra::Vector3::new(d_mapped[0], d_mapped[1], d_mapped[2]);
    Ok((quality, [g.x, g.y, g.z]))
}
