//! Sensor to surface-vertex mapping.
//!
//! Brute-force nearest neighbor over the mesh vertex table, fanned out over
//! contiguous sensor slices on scoped threads. The mesh is read-only
//! throughout and slice results are stitched back in input order, so the
//! parallel path is output-identical to the serial scan.

use std::thread;

use ndarray::Array2;

/// One sensor coordinate in head space.
pub type SensorPosition = [f64; 3];

/// Vertex table of a triangulated surface, one row per vertex. Vertex
/// indices are the row indices and never change.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    vertices: Array2<f64>,
}

impl SurfaceMesh {
    /// Build from an N x 3 vertex table.
    pub fn new(vertices: Array2<f64>) -> Self {
        assert_eq!(vertices.ncols(), 3, "vertex table must be N x 3");
        Self { vertices }
    }

    pub fn from_rows(rows: &[[f64; 3]]) -> Self {
        let mut vertices = Array2::zeros((rows.len(), 3));
        for (i, row) in rows.iter().enumerate() {
            vertices[[i, 0]] = row[0];
            vertices[[i, 1]] = row[1];
            vertices[[i, 2]] = row[2];
        }
        Self { vertices }
    }

    pub fn len(&self) -> usize {
        self.vertices.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.nrows() == 0
    }
}

/// Worker count the platform reports, clamped to at least two.
fn available_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0)
        .max(2)
}

/// Map each sensor to its nearest mesh vertex by linear scan. The first
/// vertex wins on exact distance ties. Output index i answers sensors[i].
pub fn nearest(mesh: &SurfaceMesh, sensors: &[SensorPosition]) -> Vec<usize> {
    assert!(!mesh.is_empty(), "cannot project onto an empty mesh");
    let mut mapped = Vec::with_capacity(sensors.len());
    for sensor in sensors {
        let mut champion = 0usize;
        let mut champ_dist = f64::INFINITY;
        for (i, vertex) in mesh.vertices.rows().into_iter().enumerate() {
            let dx = vertex[0] - sensor[0];
            let dy = vertex[1] - sensor[1];
            let dz = vertex[2] - sensor[2];
            let dist = (dx * dx + dy * dy + dz * dz).sqrt();
            if dist < champ_dist {
                champion = i;
                champ_dist = dist;
            }
        }
        mapped.push(champion);
    }
    mapped
}

/// Parallel projection across the platform's worker count.
pub fn project(mesh: &SurfaceMesh, sensors: &[SensorPosition]) -> Vec<usize> {
    project_with_workers(mesh, sensors, available_workers())
}

/// Parallel projection with an explicit worker count. The sensor list is
/// split into contiguous near-equal slices; the caller's thread scans the
/// first slice while the workers take the rest, and results concatenate in
/// slice order so the output matches the input order exactly.
pub fn project_with_workers(
    mesh: &SurfaceMesh,
    sensors: &[SensorPosition],
    workers: usize,
) -> Vec<usize> {
    let workers = workers.max(2);
    let slice_len = (sensors.len() + workers - 1) / workers;
    // Tiny inputs: dispatch overhead dominates, scan inline
    if slice_len <= 1 {
        return nearest(mesh, sensors);
    }

    let mut slices = sensors.chunks(slice_len);
    let first = slices.next().unwrap_or(&[]);
    let rest: Vec<&[SensorPosition]> = slices.collect();

    let mut mapped = Vec::with_capacity(sensors.len());
    thread::scope(|scope| {
        let handles: Vec<_> = rest
            .into_iter()
            .map(|slice| scope.spawn(move || nearest(mesh, slice)))
            .collect();
        // The driver takes the first slice while the workers run
        mapped.extend(nearest(mesh, first));
        // Joining in spawn order keeps the output in slice order no matter
        // which worker finishes first
        for handle in handles {
            match handle.join() {
                Ok(part) => mapped.extend(part),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
    });
    mapped
}
