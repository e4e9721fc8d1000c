//! Product catalog types

use serde::{Deserialize, Serialize};

/// A product record as served by `GET /api/products`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub images: Vec<String>,
    pub category: String,
    pub is_featured: bool,
}

impl Product {
    /// First image of the product, or the shared placeholder.
    pub fn primary_image(&self) -> &str {
        self.images
            .first()
            .map(String::as_str)
            .unwrap_or("/images/placeholder.jpg")
    }
}

/// Response body of the product listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductsEnvelope {
    pub status: String,
    pub data: ProductsData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductsData {
    pub products: Vec<Product>,
}

impl ProductsEnvelope {
    pub fn success(products: Vec<Product>) -> Self {
        Self {
            status: "success".to_string(),
            data: ProductsData { products },
        }
    }
}

fn product(
    id: &str,
    name: &str,
    description: &str,
    price: f64,
    image: &str,
    category: &str,
    is_featured: bool,
) -> Product {
    Product {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        price,
        images: vec![image.to_string()],
        category: category.to_string(),
        is_featured,
    }
}

/// The hard-coded bakery catalog.
pub fn catalog() -> Vec<Product> {
    vec![
        product(
            "prod101",
            "Classic Chocolate Cake",
            "Rich, moist chocolate cake with dark chocolate ganache.",
            35.00,
            "/images/carousel-cake-1.jpg",
            "Cake",
            true,
        ),
        product(
            "prod102",
            "Strawberry Cheesecake",
            "Creamy New York-style cheesecake topped with fresh strawberries.",
            42.50,
            "/images/carousel-cake-2.jpg",
            "Cheesecake",
            true,
        ),
        product(
            "prod103",
            "Artisan Sourdough Loaf",
            "Naturally leavened bread with a crispy crust and chewy interior.",
            8.99,
            "/images/carousel-cake-3.jpg",
            "Bread",
            false,
        ),
        product(
            "prod104",
            "Vanilla Bean Cupcake",
            "Fluffy vanilla cupcake crowned with a swirl of vanilla buttercream.",
            3.50,
            "/images/placeholder.jpg",
            "Cupcake",
            true,
        ),
    ]
}

/// Featured products in catalog order.
pub fn featured_products() -> Vec<Product> {
    catalog().into_iter().filter(|p| p.is_featured).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_featured_excludes_sourdough() {
        let ids: Vec<_> = featured_products().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["prod101", "prod102", "prod104"]);
    }

    #[test]
    fn test_product_json_field_names() {
        let json = serde_json::to_value(&catalog()[0]).unwrap();
        assert_eq!(json["_id"], "prod101");
        assert_eq!(json["isFeatured"], true);
        assert_eq!(json["price"], 35.0);
        assert_eq!(json["images"][0], "/images/carousel-cake-1.jpg");
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ProductsEnvelope::success(featured_products());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["products"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_primary_image_falls_back_to_placeholder() {
        let mut p = catalog().remove(0);
        p.images.clear();
        assert_eq!(p.primary_image(), "/images/placeholder.jpg");
    }
}
