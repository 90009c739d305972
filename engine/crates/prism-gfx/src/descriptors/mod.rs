pub mod cpu_heap;
pub mod descriptor;
pub mod gpu_heap;
pub mod heaps;
