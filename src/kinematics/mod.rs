mod jacobian;

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Isometry3};

use crate::error::{IkError, Mismatch};
use crate::multi_body::{EndEffectorId, JointKind, JointLimit, MultiBody};

use self::jacobian::Jacobian;
pub use self::jacobian::{pseudo_inverse, stack_rows};

/// What the IK engine needs from a skeleton.
///
/// Joint vectors are indexed by dof. Poses and Jacobians are in world
/// coordinates; Jacobian rows are linear velocity then angular velocity, the
/// same layout as [`pose_error`](crate::pose_error).
pub trait Kinematics {
    fn num_dofs(&self) -> usize;

    /// Current joint vector.
    fn positions(&self) -> &DVector<f64>;

    /// Replace the joint vector. Fails if the length is wrong.
    fn set_positions(&mut self, q: DVector<f64>) -> Result<(), IkError>;

    fn joint_limit(&self, dof: usize) -> Result<JointLimit, IkError>;

    /// Whether `dof` is an angle (and so wraps every 2π).
    fn is_revolute(&self, dof: usize) -> bool;

    /// Dofs between the root and the end effector, root first.
    fn chain_dofs(&self, ee: EndEffectorId) -> Result<Vec<usize>, IkError>;

    /// End-effector pose for joint vector `q`.
    fn end_effector_pose(
        &self,
        ee: EndEffectorId,
        q: &DVector<f64>,
    ) -> Result<Isometry3<f64>, IkError>;

    /// 6×`dofs.len()` Jacobian of the end-effector pose. Columns of dofs
    /// that do not move the end effector are zero.
    fn end_effector_jacobian(
        &self,
        ee: EndEffectorId,
        q: &DVector<f64>,
        dofs: &[usize],
    ) -> Result<DMatrix<f64>, IkError>;

    /// World pose of the link the joint of `dof` is mounted on.
    fn dof_parent_pose(&self, dof: usize, q: &DVector<f64>) -> Result<Isometry3<f64>, IkError>;

    fn joint_limits(&self) -> Result<Vec<JointLimit>, IkError> {
        (0..self.num_dofs()).map(|dof| self.joint_limit(dof)).collect()
    }
}

impl MultiBody {
    fn check_len(&self, q: &DVector<f64>) -> Result<(), IkError> {
        if q.len() != self.num_dofs() {
            return Err(Mismatch::JointVectorLength {
                expected: self.num_dofs(),
                got: q.len(),
            }
            .into());
        }
        Ok(())
    }

    /// World pose of `link` for joint vector `q`.
    pub fn fk(&self, link: usize, q: &DVector<f64>) -> Result<Isometry3<f64>, IkError> {
        self.check_len(q)?;
        let mut pose = Isometry3::identity();
        for index in self.chain(link)? {
            let link = &self.links()[index];
            if let Some(joint) = &link.joint {
                let position = link.dof.map_or(0.0, |dof| q[dof]);
                pose *= joint.origin * joint.motion(position);
            }
        }
        Ok(pose)
    }
}

impl Kinematics for MultiBody {
    fn num_dofs(&self) -> usize {
        MultiBody::num_dofs(self)
    }

    fn positions(&self) -> &DVector<f64> {
        self.joint_vector()
    }

    fn set_positions(&mut self, q: DVector<f64>) -> Result<(), IkError> {
        self.replace_joint_vector(q)
    }

    fn joint_limit(&self, dof: usize) -> Result<JointLimit, IkError> {
        Ok(self.dof_joint(dof)?.limit)
    }

    fn is_revolute(&self, dof: usize) -> bool {
        self.dof_joint(dof)
            .map(|joint| joint.kind == JointKind::Revolute)
            .unwrap_or(false)
    }

    fn chain_dofs(&self, ee: EndEffectorId) -> Result<Vec<usize>, IkError> {
        let ee = self.end_effector(ee)?;
        Ok(self
            .chain(ee.link)?
            .into_iter()
            .filter_map(|index| self.links()[index].dof)
            .collect())
    }

    fn end_effector_pose(
        &self,
        ee: EndEffectorId,
        q: &DVector<f64>,
    ) -> Result<Isometry3<f64>, IkError> {
        let ee = self.end_effector(ee)?;
        Ok(self.fk(ee.link, q)? * ee.offset)
    }

    fn end_effector_jacobian(
        &self,
        ee: EndEffectorId,
        q: &DVector<f64>,
        dofs: &[usize],
    ) -> Result<DMatrix<f64>, IkError> {
        self.check_len(q)?;
        let ee = self.end_effector(ee)?;
        let columns: HashMap<usize, usize> = dofs
            .iter()
            .enumerate()
            .map(|(column, &dof)| {
                if dof >= self.num_dofs() {
                    Err(IkError::from(Mismatch::DofOutOfRange {
                        dof,
                        num_dofs: self.num_dofs(),
                    }))
                } else {
                    Ok((dof, column))
                }
            })
            .collect::<Result<_, _>>()?;

        // joint axes and origins in world frame, recorded before each joint moves
        let mut pose = Isometry3::identity();
        let mut frames = Vec::new();
        for index in self.chain(ee.link)? {
            let link = &self.links()[index];
            let Some(joint) = &link.joint else { continue };
            pose *= joint.origin;
            if let Some(dof) = link.dof {
                let axis = pose.rotation * joint.axis.into_inner();
                frames.push((dof, joint.kind, axis, pose.translation.vector));
                pose *= joint.motion(q[dof]);
            }
        }
        let tip = (pose * ee.offset).translation.vector;

        let mut jacobian = Jacobian::new(dofs.len());
        for (dof, kind, axis, origin) in frames {
            if let Some(&column) = columns.get(&dof) {
                jacobian.set_column(column, kind, &axis, &origin, &tip);
            }
        }
        Ok(jacobian.into_inner())
    }

    fn dof_parent_pose(&self, dof: usize, q: &DVector<f64>) -> Result<Isometry3<f64>, IkError> {
        let link = self.dof_link_index(dof).ok_or(IkError::from(Mismatch::DofOutOfRange {
            dof,
            num_dofs: self.num_dofs(),
        }))?;
        match self.parent(link) {
            Some(parent) => self.fk(parent, q),
            None => Ok(Isometry3::identity()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::pose_error;
    use crate::multi_body::Joint;
    use approx::assert_relative_eq;
    use core::f64::consts::FRAC_PI_2;
    use nalgebra::{UnitQuaternion, Vector3};

    fn planar_arm() -> (MultiBody, EndEffectorId) {
        let mut multi_body = MultiBody::new("planar", "base");
        let limit = JointLimit::unbounded_revolute();
        let l1 = multi_body
            .add_link(0, "l1", Joint::revolute("j1", Isometry3::identity(), Vector3::z(), limit))
            .unwrap();
        let elbow = Joint::revolute("j2", Isometry3::translation(1., 0., 0.), Vector3::z(), limit);
        let l2 = multi_body.add_link(l1, "l2", elbow).unwrap();
        let ee = multi_body
            .add_end_effector("tip", l2, Isometry3::translation(1., 0., 0.))
            .unwrap();
        (multi_body, ee)
    }

    #[test]
    fn test_fk() {
        let (multi_body, ee) = planar_arm();
        let q = DVector::from_vec(vec![0., FRAC_PI_2]);
        let pose = multi_body.end_effector_pose(ee, &q).unwrap();
        assert_relative_eq!(pose.translation.vector, Vector3::new(1., 1., 0.), epsilon = 1e-12);
        assert_relative_eq!(
            pose.rotation,
            UnitQuaternion::from_euler_angles(0., 0., FRAC_PI_2),
            epsilon = 1e-12
        );
        assert_eq!(multi_body.chain_dofs(ee).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let (multi_body, ee) = planar_arm();
        let q = DVector::from_vec(vec![0.3, -0.7]);
        let jacobian = multi_body.end_effector_jacobian(ee, &q, &[0, 1]).unwrap();
        let pose = multi_body.end_effector_pose(ee, &q).unwrap();
        let h = 1e-7;
        for dof in 0..2 {
            let mut dq = q.clone();
            dq[dof] += h;
            let moved = multi_body.end_effector_pose(ee, &dq).unwrap();
            let numeric = pose_error(&pose, &moved) / h;
            for row in 0..6 {
                assert_relative_eq!(jacobian[(row, dof)], numeric[row], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_jacobian_subset_and_unrelated_dofs() {
        let (mut multi_body, ee) = planar_arm();
        let slide = JointLimit::new(-1., 1.).unwrap();
        let side = multi_body
            .add_link(0, "side", Joint::prismatic("s", Isometry3::identity(), Vector3::y(), slide))
            .unwrap();
        assert_eq!(multi_body.get_link(side).unwrap().dof, Some(2));

        let q = multi_body.positions().clone();
        let jacobian = multi_body.end_effector_jacobian(ee, &q, &[2, 1]).unwrap();
        assert_eq!(jacobian.shape(), (6, 2));
        assert_relative_eq!(jacobian.column(0).norm(), 0.0);
        assert_relative_eq!(jacobian[(1, 1)], 1.0, epsilon = 1e-12);

        assert!(matches!(
            multi_body.end_effector_jacobian(ee, &q, &[5]),
            Err(IkError::ConfigurationMismatch(Mismatch::DofOutOfRange { dof: 5, num_dofs: 3 }))
        ));
        assert!(!multi_body.is_revolute(2));
        assert!(multi_body.is_revolute(0));
    }

    #[test]
    fn test_dof_parent_pose() {
        let (multi_body, _) = planar_arm();
        let q = DVector::from_vec(vec![FRAC_PI_2, 0.]);
        assert_relative_eq!(multi_body.dof_parent_pose(0, &q).unwrap(), Isometry3::identity());
        let parent = multi_body.dof_parent_pose(1, &q).unwrap();
        assert_relative_eq!(parent.translation.vector, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(
            parent.rotation,
            UnitQuaternion::from_euler_angles(0., 0., FRAC_PI_2),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_set_positions_checks_length() {
        let (mut multi_body, _) = planar_arm();
        assert!(matches!(
            multi_body.set_positions(DVector::zeros(3)),
            Err(IkError::ConfigurationMismatch(Mismatch::JointVectorLength { expected: 2, got: 3 }))
        ));
        multi_body.set_positions(DVector::from_vec(vec![0.1, 0.2])).unwrap();
        assert_eq!(multi_body.positions()[1], 0.2);
    }
}
