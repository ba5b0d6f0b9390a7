use approx::assert_abs_diff_eq;
use hik::{
    AnalyticSeeded, AnalyticSolver, ConstrainedAxes, FrameRef, FreeParameterStrategy,
    HierarchicalIk, IkError, IkTask, Kinematics, MultiBody, SolverConfig, SolverRegistry, SrsArm,
    SrsGeometry,
};
use nalgebra::{DVector, Isometry3, Vector3};

fn registry() -> SolverRegistry {
    let mut registry = SolverRegistry::new();
    registry.register("srs7", SrsArm::new(SrsGeometry::default())).unwrap();
    registry
}

#[test]
fn solver_metadata() {
    let solver = registry().load("srs7").unwrap();
    assert_eq!(solver.num_joints(), 7);
    assert_eq!(solver.num_free_parameters(), 1);
    assert_eq!(solver.free_parameters(), &[2]);
}

#[test]
fn unknown_solver_name() {
    assert!(matches!(
        registry().load("ikfast_kr5"),
        Err(IkError::SolverNotFound(name)) if name == "ikfast_kr5"
    ));
}

#[test]
fn analytic_task_reaches_target() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut arm, ee) = SrsGeometry::default().multi_body().unwrap();
    let registry = registry();

    let target = FrameRef::world("target");
    target.set_translation(Vector3::new(0., 0., 0.5));
    let mut task = IkTask::new(&arm, ee, target).unwrap();
    let method = AnalyticSeeded::new(registry.load("srs7").unwrap(), "ikfast");
    task.set_gradient_method(&arm, method).unwrap();
    task.set_hierarchy_level(1);
    assert_eq!(task.gradient_method().name(), "ikfast");
    assert_eq!(task.dofs().len(), 6);

    let mut ik = HierarchicalIk::new(SolverConfig::default());
    ik.add_task(task);
    let report = ik.solve(&mut arm).unwrap();
    assert!(report.success(), "{report:?}");
    assert_eq!(report.tasks[0].level, 1);

    let reached = arm.end_effector_pose(ee, arm.positions()).unwrap();
    let expected = Vector3::new(0., 0., 0.5);
    assert_abs_diff_eq!(reached.translation.vector, expected, epsilon = 1e-4);
    assert_abs_diff_eq!(reached.rotation.angle(), 0., epsilon = 1e-3);
    // the free upper-arm roll is never moved
    assert_eq!(arm.positions()[2], 0.);
}

#[test]
fn analytic_task_from_nearby_start() {
    let (mut arm, ee) = SrsGeometry::default().multi_body().unwrap();
    let goal = DVector::from_row_slice(&[0.4, 0.6, -0.3, 1.2, -0.5, 0.8, 0.2]);
    let pose = arm.end_effector_pose(ee, &goal).unwrap();
    arm.set_positions(DVector::from_row_slice(&[0.2, 0.45, -0.3, 1.0, -0.3, 0.6, 0.4]))
        .unwrap();

    let target = FrameRef::world("target");
    target.set_transform(pose);
    let mut task = IkTask::new(&arm, ee, target).unwrap();
    let method = AnalyticSeeded::new(registry().load("srs7").unwrap(), "srs7");
    task.set_gradient_method(&arm, method).unwrap();

    let report = task.solve(&mut arm, &SolverConfig::default()).unwrap();
    assert!(report.success(), "{report:?}");
    let reached = arm.end_effector_pose(ee, arm.positions()).unwrap();
    assert_abs_diff_eq!(reached.translation.vector, pose.translation.vector, epsilon = 1e-4);
    assert_abs_diff_eq!(reached.rotation.angle_to(&pose.rotation), 0., epsilon = 1e-3);
}

#[test]
fn sweep_drives_free_parameter() {
    let (mut arm, ee) = SrsGeometry::default().multi_body().unwrap();
    let goal = DVector::from_row_slice(&[0.1, 0.7, 1.0, 1.3, 0.2, 0.4, 0.0]);
    let pose = arm.end_effector_pose(ee, &goal).unwrap();
    arm.set_positions(DVector::from_row_slice(&[0.15, 0.65, 0.7, 1.25, 0.25, 0.35, 0.05]))
        .unwrap();

    let target = FrameRef::world("target");
    target.set_transform(pose);
    let mut task = IkTask::new(&arm, ee, target).unwrap();
    task.set_gradient_method(
        &arm,
        AnalyticSeeded::new(registry().load("srs7").unwrap(), "srs7")
            .with_free_parameters(FreeParameterStrategy::Sweep { samples: 9 }),
    )
    .unwrap();
    assert_eq!(task.dofs().len(), 7);

    let report = task.solve(&mut arm, &SolverConfig::default()).unwrap();
    assert!(report.success(), "{report:?}");
}

#[test]
fn partial_constraint_uses_numerical_step() {
    let (mut arm, ee) = SrsGeometry::default().multi_body().unwrap();
    arm.set_positions(DVector::from_row_slice(&[0.1, 0.3, 0.0, 0.6, 0.0, 0.3, 0.0]))
        .unwrap();
    let target = FrameRef::world("target");
    target.set_transform(Isometry3::translation(0.3, 0.1, 0.4));
    let mut task = IkTask::new(&arm, ee, target).unwrap();
    task.set_axes(ConstrainedAxes::position());
    let method = AnalyticSeeded::new(registry().load("srs7").unwrap(), "srs7");
    task.set_gradient_method(&arm, method).unwrap();

    let report = task.solve(&mut arm, &SolverConfig::default()).unwrap();
    assert!(report.success(), "{report:?}");
    assert_eq!(arm.positions()[2], 0.);
}

#[test]
fn analytic_task_unreachable_target() {
    let (mut arm, ee) = SrsGeometry::default().multi_body().unwrap();
    arm.set_positions(DVector::from_row_slice(&[0.1, 0.3, 0.0, 0.6, 0.0, 0.3, 0.0]))
        .unwrap();
    let target = FrameRef::world("target");
    target.set_transform(Isometry3::translation(2., 0., 0.4));
    let mut task = IkTask::new(&arm, ee, target).unwrap();
    let method = AnalyticSeeded::new(registry().load("srs7").unwrap(), "srs7");
    task.set_gradient_method(&arm, method).unwrap();

    let config = SolverConfig::default();
    let report = task.solve(&mut arm, &config).unwrap();
    assert!(!report.success(), "{report:?}");
    assert!(report.iterations <= config.max_iterations);
    assert!(report.tasks[0].position_error > 1.0, "{report:?}");
    for (dof, &value) in arm.positions().iter().enumerate() {
        assert!(arm.joint_limit(dof).unwrap().contains(value, 1e-12), "{dof}: {value}");
    }
    assert_eq!(arm.positions()[2], 0.);
}

#[test]
fn urdf_skeleton_with_jacobian_task() {
    let arm = MultiBody::from_urdf_str(
        r#"<robot name="two_link">
  <link name="base"/>
  <link name="upper"/>
  <link name="lower"/>
  <joint name="shoulder" type="revolute">
    <parent link="base"/>
    <child link="upper"/>
    <origin xyz="0 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.0" upper="3.0" effort="1" velocity="1"/>
  </joint>
  <joint name="elbow" type="revolute">
    <parent link="upper"/>
    <child link="lower"/>
    <origin xyz="1 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.0" upper="3.0" effort="1" velocity="1"/>
  </joint>
</robot>"#,
    );
    let mut arm = arm.unwrap();
    let lower = arm.link_index("lower").unwrap();
    let ee = arm.add_end_effector("tip", lower, Isometry3::translation(1., 0., 0.)).unwrap();
    arm.set_positions(DVector::from_row_slice(&[0.3, 0.5])).unwrap();

    let target = FrameRef::world("target");
    target.set_translation(Vector3::new(0.5, 1.5, 0.));
    let mut task = IkTask::new(&arm, ee, target).unwrap();
    task.set_axes(ConstrainedAxes::position());

    let report = task.solve(&mut arm, &SolverConfig::default()).unwrap();
    assert!(report.success(), "{report:?}");
    let reached = arm.end_effector_pose(ee, arm.positions()).unwrap();
    let expected = Vector3::new(0.5, 1.5, 0.);
    assert_abs_diff_eq!(reached.translation.vector, expected, epsilon = 1e-4);
}
