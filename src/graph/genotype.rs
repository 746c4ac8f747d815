
/// One bubble of the graph, addressed for genotyping: the shared variant
/// order, the index of its first variant node (the reference allele), and
/// the number of alleles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Genotype {
    order: u32,
    first_var: u32,
    allele_count: u16,
}

impl Genotype {
    pub fn new(order: u32, first_var: u32, allele_count: u16) -> Self {
        assert!(allele_count >= 2, "a bubble always has a reference and an alternate allele");
        Self { order, first_var, allele_count }
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn first_var(&self) -> u32 {
        self.first_var
    }

    pub fn allele_count(&self) -> u16 {
        self.allele_count
    }

    /// Index of the variant node carrying allele `num`
    pub fn var_index(&self, num: u16) -> u32 {
        assert!(num < self.allele_count);
        self.first_var + u32::from(num)
    }
}
