//! Demonstrates storing different shapes side by side in one `PolyVec`.
//!
//! Each shape type has a different size, yet all of them live inline in a single buffer
//! and are reached through the `dyn Shape` capability set.

use poly_vec::{PolyVec, occupant};

trait Shape {
    fn name(&self) -> &'static str;
    fn area(&self) -> f64;
    fn scale(&mut self, factor: f64);
}

struct Circle {
    radius: f64,
}

struct Rectangle {
    width: f64,
    height: f64,
}

struct Dot;

impl Shape for Circle {
    fn name(&self) -> &'static str {
        "circle"
    }

    fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }

    fn scale(&mut self, factor: f64) {
        self.radius *= factor;
    }
}

impl Shape for Rectangle {
    fn name(&self) -> &'static str {
        "rectangle"
    }

    fn area(&self) -> f64 {
        self.width * self.height
    }

    fn scale(&mut self, factor: f64) {
        self.width *= factor;
        self.height *= factor;
    }
}

impl Shape for Dot {
    fn name(&self) -> &'static str {
        "dot"
    }

    fn area(&self) -> f64 {
        0.0
    }

    fn scale(&mut self, _factor: f64) {}
}

impl Drop for Rectangle {
    fn drop(&mut self) {
        println!("  (dropped a {}x{} rectangle)", self.width, self.height);
    }
}

occupant!(dyn Shape: Circle, Rectangle, Dot);

fn print_all(shapes: &PolyVec<dyn Shape>) {
    for index in shapes.indices() {
        let shape = &shapes[index];
        println!(
            "  [{index}] {:<9} area {:>7.2}  at offset {:>3}, slot size {:>2}",
            shape.name(),
            shape.area(),
            shapes.offset_at(index).expect("index came from indices()"),
            shapes.size_at(index).expect("index came from indices()"),
        );
    }
}

fn main() {
    println!("=== PolyVec Shapes Example ===");
    println!();

    let mut shapes = PolyVec::<dyn Shape>::new();

    shapes.push(Circle { radius: 1.0 }).expect("buffer has room");
    shapes
        .emplace(|| Rectangle {
            width: 2.0,
            height: 3.0,
        })
        .expect("buffer has room");
    shapes.push_back(Dot).expect("buffer has room");
    shapes.push(Circle { radius: 0.5 }).expect("buffer has room");

    println!("Four shapes, {} bytes used:", shapes.bump_offset());
    print_all(&shapes);
    println!();

    println!("Freeing the rectangle:");
    shapes.free(1).expect("slot 1 exists and is live");
    println!("  slot 1 free: {}", shapes.is_free(1).expect("slot 1 exists"));
    println!();

    println!("Pushing a circle reuses the freed slot:");
    let index = shapes
        .push(Circle { radius: 2.0 })
        .expect("buffer has room");
    println!("  new circle went to slot {index}");
    print_all(&shapes);
    println!();

    println!("Doubling every shape:");
    for shape in &mut shapes {
        shape.scale(2.0);
    }
    let total: f64 = shapes.iter().map(Shape::area).sum();
    println!("  total area is now {total:.2}");
    println!();

    println!("Freeing everything:");
    shapes.push_back(Rectangle {
        width: 1.0,
        height: 1.0,
    })
    .expect("buffer has room");
    shapes.free_all();
    println!("  {} slots remain", shapes.len());
}
