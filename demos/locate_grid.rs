use meshloc::{Mesh, PointLocator, SpatialIndex};
use rand::prelude::*;

fn main() -> anyhow::Result<()> {
    let (xmin, xmax) = (0., 10.);
    let (ymin, ymax) = (0., 10.);
    let n = 200;

    let mesh = Mesh::grid(xmin, xmax, ymin, ymax, n, n)?;
    let index = SpatialIndex::new(&mesh)?;

    let mut rng = rand::thread_rng();
    let query: Vec<_> = (0..420_000)
        .map(|_| [rng.gen::<f64>() * xmax, rng.gen::<f64>() * ymax])
        .collect();

    let res = index.par_locate_many(&query);
    let found = res.iter().filter(|location| location.is_some()).count();
    println!(
        "Located {} of {} points in {:?} bins (spiral levels {:?})",
        found,
        query.len(),
        index.nbin(),
        index.spiral_levels()
    );

    Ok(())
}
