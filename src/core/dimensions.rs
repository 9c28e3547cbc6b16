/// Overall building measurements and the areas and lengths derived from them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BuildingDimensions {
    pub width: f64,
    pub length: f64,
    pub wall_height: f64,
    pub floor_thickness: f64,
    pub total_interior_walls_length: f64,
    pub roof_rise_per_foot: f64,
    pub soffit_overhang_width: f64,
}

/// Script-facing names of the stored fields.
pub const FIELDS: [&str; 7] = [
    "width",
    "length",
    "wallHeight",
    "floorThickness",
    "totalInteriorWallsLength",
    "roofRisePerFoot",
    "soffitOverhangWidth",
];

/// Script-facing names of the derived, read-only values.
pub const GETTERS: [&str; 11] = [
    "floorSurfaceArea",
    "exteriorWallSurfaceArea",
    "exteriorWallInteriorSurfaceArea",
    "interiorWallSurfaceArea",
    "slopeFactor",
    "roofBaseLength",
    "roofBaseWidth",
    "roofSurfaceArea",
    "roofPerimeter",
    "exteriorWallsLinearFeet",
    "interiorWallsLinearFeet",
];

impl BuildingDimensions {
    pub fn floor_surface_area(&self) -> f64 {
        self.width * self.length
    }

    pub fn exterior_wall_surface_area(&self) -> f64 {
        2.0 * (self.wall_height + self.floor_thickness) * (self.width + self.length)
    }

    pub fn exterior_wall_interior_surface_area(&self) -> f64 {
        self.width * self.wall_height * 2.0 + self.length * self.wall_height * 2.0
    }

    pub fn interior_wall_surface_area(&self) -> f64 {
        self.total_interior_walls_length * self.wall_height * 2.0
    }

    /// Roof length per horizontal foot of run.
    pub fn slope_factor(&self) -> f64 {
        (self.roof_rise_per_foot.powi(2) + self.soffit_overhang_width.powi(2)).sqrt() / 12.0
    }

    pub fn roof_base_length(&self) -> f64 {
        self.length + 2.0 * self.soffit_overhang_width
    }

    pub fn roof_base_width(&self) -> f64 {
        self.width + 2.0 * self.soffit_overhang_width
    }

    pub fn roof_surface_area(&self) -> f64 {
        self.roof_base_length() * self.roof_base_width() * self.slope_factor()
    }

    pub fn roof_perimeter(&self) -> f64 {
        (self.roof_base_length() + self.roof_base_width()) * 2.0
    }

    pub fn exterior_walls_linear_feet(&self) -> f64 {
        2.0 * (self.width + self.length)
    }

    pub fn interior_walls_linear_feet(&self) -> f64 {
        self.total_interior_walls_length
    }

    /// Reads a field or derived value by its script-facing name.
    pub fn get(&self, key: &str) -> Option<f64> {
        let value = match key {
            "width" => self.width,
            "length" => self.length,
            "wallHeight" => self.wall_height,
            "floorThickness" => self.floor_thickness,
            "totalInteriorWallsLength" => self.total_interior_walls_length,
            "roofRisePerFoot" => self.roof_rise_per_foot,
            "soffitOverhangWidth" => self.soffit_overhang_width,
            "floorSurfaceArea" => self.floor_surface_area(),
            "exteriorWallSurfaceArea" => self.exterior_wall_surface_area(),
            "exteriorWallInteriorSurfaceArea" => self.exterior_wall_interior_surface_area(),
            "interiorWallSurfaceArea" => self.interior_wall_surface_area(),
            "slopeFactor" => self.slope_factor(),
            "roofBaseLength" => self.roof_base_length(),
            "roofBaseWidth" => self.roof_base_width(),
            "roofSurfaceArea" => self.roof_surface_area(),
            "roofPerimeter" => self.roof_perimeter(),
            "exteriorWallsLinearFeet" => self.exterior_walls_linear_feet(),
            "interiorWallsLinearFeet" => self.interior_walls_linear_feet(),
            _ => return None,
        };
        Some(value)
    }

    /// Writes a stored field; returns false for derived or unknown names.
    pub fn set(&mut self, key: &str, value: f64) -> bool {
        let slot = match key {
            "width" => &mut self.width,
            "length" => &mut self.length,
            "wallHeight" => &mut self.wall_height,
            "floorThickness" => &mut self.floor_thickness,
            "totalInteriorWallsLength" => &mut self.total_interior_walls_length,
            "roofRisePerFoot" => &mut self.roof_rise_per_foot,
            "soffitOverhangWidth" => &mut self.soffit_overhang_width,
            _ => return false,
        };
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn house() -> BuildingDimensions {
        BuildingDimensions {
            width: 20.0,
            length: 40.0,
            wall_height: 8.0,
            floor_thickness: 1.0,
            total_interior_walls_length: 50.0,
            roof_rise_per_foot: 5.0,
            soffit_overhang_width: 12.0,
        }
    }

    #[test]
    fn derives_areas_and_lengths() {
        let bd = house();
        assert_eq!(bd.floor_surface_area(), 800.0);
        assert_eq!(bd.exterior_wall_surface_area(), 1080.0);
        assert_eq!(bd.exterior_wall_interior_surface_area(), 960.0);
        assert_eq!(bd.interior_wall_surface_area(), 800.0);
        assert_eq!(bd.slope_factor(), 13.0 / 12.0);
        assert_eq!(bd.roof_base_length(), 64.0);
        assert_eq!(bd.roof_base_width(), 44.0);
        assert_eq!(bd.roof_perimeter(), 216.0);
        assert_eq!(bd.exterior_walls_linear_feet(), 120.0);
        assert_eq!(bd.interior_walls_linear_feet(), 50.0);
    }

    #[test]
    fn every_script_name_resolves() {
        let bd = house();
        for key in FIELDS.iter().chain(GETTERS.iter()) {
            assert!(bd.get(key).is_some(), "{} should resolve", key);
        }
        assert_eq!(bd.get("volume"), None);
    }

    #[test]
    fn only_stored_fields_are_writable() {
        let mut bd = house();
        assert!(bd.set("width", 30.0));
        assert_eq!(bd.floor_surface_area(), 1200.0);
        assert!(!bd.set("floorSurfaceArea", 1.0));
    }
}
