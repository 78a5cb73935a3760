pub type Vector3 = nalgebra::Vector3<f64>;

/// Product of the three components.
///
/// Applied to a vector of linear interpolation factors, this is the weight
/// which trilinear interpolation assigns to one corner of the enclosing cell.
pub trait Volume {
    fn volume(&self) -> f64;
}

impl Volume for Vector3 {
    #[inline]
    fn volume(&self) -> f64 { self.x * self.y * self.z }
}

/// Split a position into the integer coordinates of the cell corner below it,
/// and the fractional offset from that corner.
#[inline]
pub fn split_floor(m: &Vector3) -> ([i64; 3], Vector3) {
    let f = m.map(f64::floor);
    ([f.x as i64, f.y as i64, f.z as i64], m - f)
}
