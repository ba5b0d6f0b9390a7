use std::{
    collections::{HashMap, HashSet, VecDeque},
    f64::consts::PI,
    path::Path,
};

use nalgebra::{DVector, Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use urdf_rs::{read_file, read_from_string};

use crate::error::{IkError, Mismatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Prismatic,
    Fixed,
}

/// Position limits of one degree of freedom (rad or m).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub lower: f64,
    pub upper: f64,
}

impl JointLimit {
    pub fn new(lower: f64, upper: f64) -> Result<Self, IkError> {
        if !(lower <= upper) {
            return Err(IkError::InvalidLimit { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    pub const fn unbounded_revolute() -> Self {
        Self {
            lower: -PI,
            upper: PI,
        }
    }

    pub fn contains(&self, value: f64, tolerance: f64) -> bool {
        value >= self.lower - tolerance && value <= self.upper + tolerance
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }
}

/// The joint connecting a link to its parent.
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub kind: JointKind,
    /// Static transform from the parent link frame to the joint frame.
    pub origin: Isometry3<f64>,
    /// Motion axis in the joint frame.
    pub axis: Unit<Vector3<f64>>,
    pub limit: JointLimit,
}

impl Joint {
    pub fn revolute(
        name: impl Into<String>,
        origin: Isometry3<f64>,
        axis: Vector3<f64>,
        limit: JointLimit,
    ) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Revolute,
            origin,
            axis: Unit::new_normalize(axis),
            limit,
        }
    }

    pub fn prismatic(
        name: impl Into<String>,
        origin: Isometry3<f64>,
        axis: Vector3<f64>,
        limit: JointLimit,
    ) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Prismatic,
            origin,
            axis: Unit::new_normalize(axis),
            limit,
        }
    }

    pub fn fixed(name: impl Into<String>, origin: Isometry3<f64>) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Fixed,
            origin,
            axis: Vector3::z_axis(),
            limit: JointLimit {
                lower: 0.0,
                upper: 0.0,
            },
        }
    }

    pub fn is_actuated(&self) -> bool {
        self.kind != JointKind::Fixed
    }

    /// Transform produced by moving the joint to `position`.
    pub fn motion(&self, position: f64) -> Isometry3<f64> {
        match self.kind {
            JointKind::Revolute => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&self.axis, position),
            ),
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(self.axis.into_inner() * position),
                UnitQuaternion::identity(),
            ),
            JointKind::Fixed => Isometry3::identity(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    /// `None` only for the root link.
    pub joint: Option<Joint>,
    /// Index into the joint vector when the joint is actuated.
    pub dof: Option<usize>,
}

/// Handle to an end effector registered on a [`MultiBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndEffectorId(pub usize);

/// A frame rigidly attached to a link.
#[derive(Debug, Clone)]
pub struct EndEffector {
    pub name: String,
    pub link: usize,
    pub offset: Isometry3<f64>,
}

/// Tree of links connected by joints, together with its joint vector.
#[derive(Debug, Clone)]
pub struct MultiBody {
    // link index graph
    graph: petgraph::graphmap::DiGraphMap<usize, ()>,
    links: Vec<Link>,
    // dof index -> link index
    dof_links: Vec<usize>,
    positions: DVector<f64>,
    end_effectors: Vec<EndEffector>,
    pub root_index: usize,
    pub name: String,
}

impl MultiBody {
    /// A skeleton containing only its root link.
    pub fn new(name: impl Into<String>, root_link: impl Into<String>) -> MultiBody {
        let mut graph = petgraph::graphmap::DiGraphMap::new();
        graph.add_node(0);
        MultiBody {
            graph,
            links: vec![Link {
                name: root_link.into(),
                joint: None,
                dof: None,
            }],
            dof_links: Vec::new(),
            positions: DVector::zeros(0),
            end_effectors: Vec::new(),
            root_index: 0,
            name: name.into(),
        }
    }

    pub fn from_urdf(path: impl AsRef<Path>) -> Result<MultiBody, IkError> {
        let robot = read_file(path)?;
        parse_robot(robot)
    }

    pub fn from_urdf_str(xml: &str) -> Result<MultiBody, IkError> {
        let robot = read_from_string(xml)?;
        parse_robot(robot)
    }

    /// Attach a new link below `parent`. Actuated joints get the next dof
    /// index, starting at position zero clamped into the joint limits.
    pub fn add_link(
        &mut self,
        parent: usize,
        name: impl Into<String>,
        joint: Joint,
    ) -> Result<usize, IkError> {
        let name = name.into();
        if parent >= self.links.len() {
            return Err(IkError::UnknownLink(format!("#{parent}")));
        }
        if self.link_index(&name).is_some() {
            return Err(IkError::DuplicateLink(name));
        }
        let index = self.links.len();
        let dof = if joint.is_actuated() {
            let dof = self.dof_links.len();
            self.dof_links.push(index);
            let mut positions: Vec<f64> = self.positions.iter().copied().collect();
            positions.push(joint.limit.clamp(0.0));
            self.positions = DVector::from_vec(positions);
            Some(dof)
        } else {
            None
        };
        self.links.push(Link {
            name,
            joint: Some(joint),
            dof,
        });
        self.graph.add_node(index);
        self.graph.add_edge(parent, index, ());
        Ok(index)
    }

    pub fn link_index(&self, name: &str) -> Option<usize> {
        self.links.iter().position(|link| link.name == name)
    }

    pub fn get_link(&self, index: usize) -> Option<&Link> {
        self.links.get(index)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .next()
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .collect()
    }

    /// Links reachable from `start`, parents before children.
    pub fn bfs(&self, start: usize) -> Vec<usize> {
        let bfs = Bfs::new(&self.graph, start);
        let iter = BfsIter {
            graph: &self.graph,
            bfs,
        };
        iter.collect()
    }

    /// Link indices from the root down to `link`, both included.
    pub fn chain(&self, link: usize) -> Result<Vec<usize>, IkError> {
        if link >= self.links.len() {
            return Err(IkError::UnknownLink(format!("#{link}")));
        }
        let mut chain = vec![];
        let mut current = link;
        loop {
            chain.push(current);
            match self.parent(current) {
                Some(p) => current = p,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn num_dofs(&self) -> usize {
        self.dof_links.len()
    }

    /// Link whose joint drives `dof`.
    pub fn dof_link(&self, dof: usize) -> Option<&Link> {
        self.dof_links.get(dof).and_then(|&index| self.links.get(index))
    }

    pub(crate) fn dof_joint(&self, dof: usize) -> Result<&Joint, IkError> {
        self.dof_link(dof)
            .and_then(|link| link.joint.as_ref())
            .ok_or(IkError::from(Mismatch::DofOutOfRange {
                dof,
                num_dofs: self.num_dofs(),
            }))
    }

    pub(crate) fn dof_link_index(&self, dof: usize) -> Option<usize> {
        self.dof_links.get(dof).copied()
    }

    pub(crate) fn joint_vector(&self) -> &DVector<f64> {
        &self.positions
    }

    pub(crate) fn replace_joint_vector(&mut self, q: DVector<f64>) -> Result<(), IkError> {
        if q.len() != self.num_dofs() {
            return Err(Mismatch::JointVectorLength {
                expected: self.num_dofs(),
                got: q.len(),
            }
            .into());
        }
        self.positions = q;
        Ok(())
    }

    pub fn add_end_effector(
        &mut self,
        name: impl Into<String>,
        link: usize,
        offset: Isometry3<f64>,
    ) -> Result<EndEffectorId, IkError> {
        if link >= self.links.len() {
            return Err(IkError::UnknownLink(format!("#{link}")));
        }
        self.end_effectors.push(EndEffector {
            name: name.into(),
            link,
            offset,
        });
        Ok(EndEffectorId(self.end_effectors.len() - 1))
    }

    pub fn end_effector(&self, id: EndEffectorId) -> Result<&EndEffector, IkError> {
        self.end_effectors
            .get(id.0)
            .ok_or(IkError::UnknownEndEffector(id.0))
    }

    pub fn end_effector_by_name(&self, name: &str) -> Option<EndEffectorId> {
        self.end_effectors
            .iter()
            .position(|ee| ee.name == name)
            .map(EndEffectorId)
    }
}

struct BfsIter<'a> {
    graph: &'a petgraph::graphmap::DiGraphMap<usize, ()>,
    bfs: Bfs<usize, HashSet<usize>>,
}

impl<'a> Iterator for BfsIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.bfs.next(self.graph)
    }
}

fn parse_robot(robot: urdf_rs::Robot) -> Result<MultiBody, IkError> {
    let child_links: HashSet<&str> = robot
        .joints
        .iter()
        .map(|joint| joint.child.link.as_str())
        .collect();

    // find root link
    let root = robot
        .links
        .iter()
        .find(|link| !child_links.contains(link.name.as_str()))
        .ok_or_else(|| IkError::UnknownLink("no root link".to_string()))?;

    // parent link name -> joints hanging below it
    let mut below: HashMap<&str, Vec<&urdf_rs::Joint>> = HashMap::new();
    for joint in &robot.joints {
        below
            .entry(joint.parent.link.as_str())
            .or_default()
            .push(joint);
    }

    let mut multi_body = MultiBody::new(robot.name.clone(), root.name.clone());
    let mut queue = VecDeque::from([(root.name.as_str(), multi_body.root_index)]);
    while let Some((link_name, link_index)) = queue.pop_front() {
        for joint in below.get(link_name).into_iter().flatten() {
            let child =
                multi_body.add_link(link_index, joint.child.link.clone(), convert_joint(joint)?)?;
            queue.push_back((joint.child.link.as_str(), child));
        }
    }
    Ok(multi_body)
}

fn convert_joint(joint: &urdf_rs::Joint) -> Result<Joint, IkError> {
    let origin = origin_to_isometry(&joint.origin);
    let [x, y, z] = joint.axis.xyz.0;
    let axis = Vector3::new(x, y, z);
    Ok(match joint.joint_type {
        urdf_rs::JointType::Revolute => Joint::revolute(
            joint.name.clone(),
            origin,
            axis,
            JointLimit::new(joint.limit.lower, joint.limit.upper)?,
        ),
        urdf_rs::JointType::Continuous => Joint::revolute(
            joint.name.clone(),
            origin,
            axis,
            JointLimit::unbounded_revolute(),
        ),
        urdf_rs::JointType::Prismatic => Joint::prismatic(
            joint.name.clone(),
            origin,
            axis,
            JointLimit::new(joint.limit.lower, joint.limit.upper)?,
        ),
        _ => Joint::fixed(joint.name.clone(), origin),
    })
}

fn origin_to_isometry(origin: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = origin.rpy.0;
    let xyz = origin.xyz.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    const TWO_LINK_ARM: &str = r#"
        <robot name="two_link_arm">
            <link name="base"/>
            <link name="upper_arm"/>
            <link name="forearm"/>
            <link name="end_effector"/>
            <joint name="shoulder" type="revolute">
                <parent link="base"/><child link="upper_arm"/>
                <origin xyz="0 0 0.05" rpy="0 0 0"/>
                <axis xyz="0 0 1"/>
                <limit lower="-2.617" upper="2.617" effort="50" velocity="3"/>
            </joint>
            <joint name="elbow" type="revolute">
                <parent link="upper_arm"/><child link="forearm"/>
                <origin xyz="0 0 0.3" rpy="0 0 0"/>
                <axis xyz="0 0 1"/>
                <limit lower="-2.094" upper="2.094" effort="30" velocity="5"/>
            </joint>
            <joint name="ee_fixed" type="fixed">
                <parent link="forearm"/><child link="end_effector"/>
                <origin xyz="0 0 0.25"/>
            </joint>
        </robot>
    "#;

    #[test]
    fn test_from_urdf_str() {
        let multi_body = MultiBody::from_urdf_str(TWO_LINK_ARM).unwrap();
        assert_eq!(multi_body.name, "two_link_arm");
        assert_eq!(multi_body.num_dofs(), 2);
        assert_eq!(multi_body.links().len(), 4);
        assert_eq!(multi_body.dof_link(0).unwrap().name, "upper_arm");
        assert_eq!(multi_body.dof_link(1).unwrap().name, "forearm");

        let ee = multi_body.link_index("end_effector").unwrap();
        let names: Vec<_> = multi_body
            .chain(ee)
            .unwrap()
            .into_iter()
            .map(|i| multi_body.get_link(i).unwrap().name.clone())
            .collect();
        assert_eq!(names, ["base", "upper_arm", "forearm", "end_effector"]);

        let limit = multi_body.dof_joint(1).unwrap().limit;
        assert_eq!(limit, JointLimit { lower: -2.094, upper: 2.094 });
    }

    #[test]
    fn test_tree_structure() {
        let mut multi_body = MultiBody::new("tree", "torso");
        let z = Vector3::z();
        let limit = JointLimit::unbounded_revolute();
        let left_joint = Joint::revolute("l", Isometry3::translation(0., 0.2, 0.), z, limit);
        let left = multi_body.add_link(0, "left", left_joint).unwrap();
        let right_joint = Joint::revolute("r", Isometry3::translation(0., -0.2, 0.), z, limit);
        let right = multi_body.add_link(0, "right", right_joint).unwrap();
        let hand = multi_body
            .add_link(left, "hand", Joint::fixed("h", Isometry3::translation(0.3, 0., 0.)))
            .unwrap();

        assert_eq!(multi_body.num_dofs(), 2);
        assert_eq!(multi_body.get_link(hand).unwrap().dof, None);
        assert_eq!(multi_body.parent(hand), Some(left));
        let mut children = multi_body.children(0);
        children.sort();
        assert_eq!(children, vec![left, right]);
        assert_eq!(multi_body.bfs(0)[0], 0);
        assert_eq!(multi_body.bfs(0).len(), 4);
    }

    #[test]
    fn test_builder_errors() {
        let mut multi_body = MultiBody::new("m", "base");
        let joint = Joint::fixed("j", Isometry3::identity());
        assert!(matches!(
            multi_body.add_link(3, "x", joint.clone()),
            Err(IkError::UnknownLink(_))
        ));
        assert!(matches!(
            multi_body.add_link(0, "base", joint),
            Err(IkError::DuplicateLink(_))
        ));
        assert!(matches!(
            JointLimit::new(1.0, -1.0),
            Err(IkError::InvalidLimit { .. })
        ));
        assert!(matches!(
            multi_body.end_effector(EndEffectorId(0)),
            Err(IkError::UnknownEndEffector(0))
        ));
    }

    #[test]
    fn test_initial_positions_within_limits() {
        let mut multi_body = MultiBody::new("m", "base");
        let limit = JointLimit::new(0.2, 1.0).unwrap();
        let slider = Joint::prismatic("s", Isometry3::identity(), Vector3::x(), limit);
        multi_body.add_link(0, "slider", slider).unwrap();
        assert_eq!(multi_body.joint_vector()[0], 0.2);
        assert!(multi_body.replace_joint_vector(DVector::zeros(3)).is_err());
    }
}
