use hik::{
    AnalyticSeeded, ConstrainedAxes, FrameRef, HierarchicalIk, IkError, IkTask, Kinematics,
    SolverConfig, SolverRegistry, SrsArm, SrsGeometry,
};
use nalgebra::{UnitQuaternion, Vector3};

fn main() -> Result<(), IkError> {
    env_logger::init();

    let geometry = SrsGeometry::default();
    let (mut arm, ee) = geometry.multi_body()?;
    let mut registry = SolverRegistry::new();
    registry.register("srs7", SrsArm::new(geometry))?;

    let target = FrameRef::world("goal");
    target.set_translation(Vector3::new(0.2, 0.1, 0.45));
    target.set_orientation(UnitQuaternion::from_euler_angles(0., std::f64::consts::FRAC_PI_2, 0.));

    let mut task = IkTask::new(&arm, ee, target.clone())?;
    task.set_gradient_method(&arm, AnalyticSeeded::new(registry.load("srs7")?, "srs7-seeded"))?;
    task.set_hierarchy_level(1);

    let mut ik = HierarchicalIk::new(SolverConfig::default());
    ik.add_task(task);
    let report = ik.solve(&mut arm)?;
    println!("{:?} after {} iterations", report.outcome, report.iterations);
    println!("q = {:.4}", arm.positions().transpose());

    // the same arm with a purely numerical task, position only
    let (mut numeric, ee) = geometry.multi_body()?;
    let mut task = IkTask::new(&numeric, ee, target)?;
    task.set_axes(ConstrainedAxes::position());
    let report = task.solve(&mut numeric, &SolverConfig::default())?;
    println!("numerical: {:?} after {} iterations", report.outcome, report.iterations);

    Ok(())
}
