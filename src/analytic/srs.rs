use std::f64::consts::PI;

use nalgebra::{Isometry3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use super::{check_free_values, AnalyticSolver, Candidate, CandidateSet};
use crate::error::IkError;
use crate::multi_body::{EndEffectorId, Joint, JointLimit, MultiBody};

const REACH_EPS: f64 = 1e-9;
const AXIS_EPS: f64 = 1e-8;
const WRIST_EPS: f64 = 1e-9;
const BRANCH_EPS: f64 = 1e-12;

const FREE: [usize; 1] = [2];

/// Link lengths of a 7-DOF spherical-shoulder / spherical-wrist arm.
///
/// At zero configuration every link points along +z. Joint axes, from the
/// base: z, y, z (upper-arm roll), y (elbow), z, y, z. The last three axes
/// intersect at the wrist center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SrsGeometry {
    /// Base to shoulder center.
    pub base_height: f64,
    /// Shoulder center to elbow.
    pub upper_arm: f64,
    /// Elbow to wrist center.
    pub forearm: f64,
    /// Wrist center to tool frame.
    pub tool: f64,
}

impl Default for SrsGeometry {
    fn default() -> Self {
        Self {
            base_height: 0.1,
            upper_arm: 0.3,
            forearm: 0.3,
            tool: 0.05,
        }
    }
}

impl SrsGeometry {
    /// The skeleton this geometry describes, with its tool frame registered
    /// as end effector `"ee"`.
    pub fn multi_body(&self) -> Result<(MultiBody, EndEffectorId), IkError> {
        let z = Vector3::z();
        let y = Vector3::y();
        let limit = JointLimit::new(-PI, PI)?;
        let joints = [
            ("shoulder_yaw", Isometry3::translation(0., 0., self.base_height), z),
            ("shoulder_pitch", Isometry3::identity(), y),
            ("upper_arm_roll", Isometry3::identity(), z),
            ("elbow", Isometry3::translation(0., 0., self.upper_arm), y),
            ("forearm_roll", Isometry3::identity(), z),
            ("wrist_pitch", Isometry3::translation(0., 0., self.forearm), y),
            ("wrist_roll", Isometry3::identity(), z),
        ];

        let mut multi_body = MultiBody::new("srs7", "base");
        let mut parent = multi_body.root_index;
        for (i, (name, origin, axis)) in joints.into_iter().enumerate() {
            parent = multi_body.add_link(
                parent,
                format!("link{}", i + 1),
                Joint::revolute(name, origin, axis, limit),
            )?;
        }
        let tool = Isometry3::translation(0., 0., self.tool);
        let ee = multi_body.add_end_effector("ee", parent, tool)?;
        Ok((multi_body, ee))
    }
}

/// Closed-form solver for [`SrsGeometry`] arms with the upper-arm roll
/// (chain index 2) as free parameter.
///
/// Up to eight branches: bit 0 flips the elbow, bit 1 the shoulder pitch,
/// bit 2 the wrist pitch.
#[derive(Debug, Clone)]
pub struct SrsArm {
    geometry: SrsGeometry,
}

impl SrsArm {
    pub fn new(geometry: SrsGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &SrsGeometry {
        &self.geometry
    }
}

impl AnalyticSolver for SrsArm {
    fn num_joints(&self) -> usize {
        7
    }

    fn free_parameters(&self) -> &[usize] {
        &FREE
    }

    fn solve(&self, target: &Isometry3<f64>, free: &[f64]) -> Result<CandidateSet, IkError> {
        check_free_values(self, free)?;
        let SrsGeometry {
            base_height,
            upper_arm: l1,
            forearm: l2,
            tool,
        } = self.geometry;
        let q2 = free[0];

        let rotation = target.rotation.to_rotation_matrix();
        let wrist = target.translation.vector - rotation * Vector3::new(0., 0., tool);
        let d = wrist - Vector3::new(0., 0., base_height);

        let mut set = CandidateSet::new();

        // elbow from the shoulder-wrist distance
        let c3 = (d.norm_squared() - l1 * l1 - l2 * l2) / (2. * l1 * l2);
        if c3.abs() > 1. + REACH_EPS {
            return Ok(set);
        }
        let elbow = c3.clamp(-1., 1.).acos();

        for (elbow_bit, q3) in [(0, elbow), (1, -elbow)] {
            if elbow_bit == 1 && elbow.abs() < BRANCH_EPS {
                continue;
            }
            // wrist center in the frame after the shoulder pitch
            let v = Vector3::new(
                l2 * q3.sin() * q2.cos(),
                l2 * q3.sin() * q2.sin(),
                l1 + l2 * q3.cos(),
            );
            if v.x.hypot(v.z) < AXIS_EPS {
                continue;
            }
            // |v| == |d|, so v.x² + v.z² - d.z² == d.x² + d.y² - v.y²
            let horizontal = d.x * d.x + d.y * d.y - v.y * v.y;
            if horizontal < -REACH_EPS {
                continue;
            }
            let phi = v.x.atan2(v.z);
            let alpha = horizontal.max(0.).sqrt().atan2(d.z);

            for (shoulder_bit, q1) in [(0, alpha - phi), (1, -alpha - phi)] {
                if shoulder_bit == 1 && alpha.abs() < BRANCH_EPS {
                    continue;
                }
                let wx = v.x * q1.cos() + v.z * q1.sin();
                // wrist center on the base axis: yaw is undetermined, pin it
                let q0 = if wx.hypot(v.y) < AXIS_EPS {
                    0.
                } else {
                    d.y.atan2(d.x) - v.y.atan2(wx)
                };

                let r03 = rot_z(q0) * rot_y(q1) * rot_z(q2) * rot_y(q3);
                let rw = r03.inverse() * rotation;
                for (wrist_bit, (q4, q5, q6)) in zyz(rw.matrix()).into_iter().enumerate() {
                    let branch = elbow_bit | (shoulder_bit << 1) | ((wrist_bit as u32) << 2);
                    set.push(Candidate {
                        joints: vec![
                            wrap_angle(q0),
                            wrap_angle(q1),
                            q2,
                            wrap_angle(q3),
                            wrap_angle(q4),
                            wrap_angle(q5),
                            wrap_angle(q6),
                        ],
                        branch,
                    });
                }
            }
        }
        Ok(set)
    }
}

fn rot_z(angle: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), angle)
}

fn rot_y(angle: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), angle)
}

/// Z-Y-Z Euler angles `(a, b, c)` with `R = Rz(a) Ry(b) Rz(c)`. Two
/// solutions away from `sin b = 0`, one (with `a = 0`) at the singularity.
fn zyz(r: &nalgebra::Matrix3<f64>) -> Vec<(f64, f64, f64)> {
    let sb = r[(0, 2)].hypot(r[(1, 2)]);
    if sb < WRIST_EPS {
        if r[(2, 2)] > 0. {
            vec![(0., 0., r[(1, 0)].atan2(r[(0, 0)]))]
        } else {
            vec![(0., PI, r[(1, 0)].atan2(r[(1, 1)]))]
        }
    } else {
        let b = sb.atan2(r[(2, 2)]);
        vec![
            (r[(1, 2)].atan2(r[(0, 2)]), b, r[(2, 1)].atan2(-r[(2, 0)])),
            ((-r[(1, 2)]).atan2(-r[(0, 2)]), -b, (-r[(2, 1)]).atan2(r[(2, 0)])),
        ]
    }
}

/// Map an angle into `[-π, π]`.
pub(crate) fn wrap_angle(angle: f64) -> f64 {
    angle - 2. * PI * (angle / (2. * PI)).round()
}
